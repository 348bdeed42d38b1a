//! Stage catalog: calibration constants for the stage models the MCM3000 drives.
//!
//! The table is closed and versioned. Adding a stage model is a data change here,
//! never a protocol change.

use daq_core::error::{AppResult, DaqError};

/// Calibration of one stage model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageCalibration {
    /// Linear travel per encoder count
    pub um_per_count: f64,
    /// Symmetric travel limit around the encoder zero, in micrometers
    pub travel_limit_um: f64,
}

/// Supported stage models as `(model, calibration)`.
pub static SUPPORTED_STAGES: &[(&str, StageCalibration)] = &[
    (
        "ZFM2020",
        StageCalibration {
            um_per_count: 0.2116667,
            travel_limit_um: 12_700.0,
        },
    ),
    (
        "ZFM2030",
        StageCalibration {
            um_per_count: 0.2116667,
            travel_limit_um: 12_700.0,
        },
    ),
    (
        "MMP-2XY",
        StageCalibration {
            um_per_count: 0.5,
            travel_limit_um: 25_400.0,
        },
    ),
];

/// Look up the calibration for a stage model.
///
/// # Errors
///
/// [`DaqError::Configuration`] if the model is not in [`SUPPORTED_STAGES`].
pub fn lookup(model: &str) -> AppResult<StageCalibration> {
    SUPPORTED_STAGES
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, calibration)| *calibration)
        .ok_or_else(|| {
            DaqError::Configuration(format!(
                "stage '{}' not supported (known: {})",
                model,
                supported_models().join(", ")
            ))
        })
}

/// Names of all supported stage models, in table order.
pub fn supported_models() -> Vec<&'static str> {
    SUPPORTED_STAGES.iter().map(|(name, _)| *name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_models() {
        let zfm = lookup("ZFM2020").unwrap();
        assert_eq!(zfm.um_per_count, 0.2116667);
        assert_eq!(zfm.travel_limit_um, 12_700.0);

        let mmp = lookup("MMP-2XY").unwrap();
        assert_eq!(mmp.um_per_count, 0.5);
        assert_eq!(mmp.travel_limit_um, 25_400.0);
    }

    #[test]
    fn lookup_is_case_sensitive_and_closed() {
        assert!(matches!(lookup("zfm2020"), Err(DaqError::Configuration(_))));
        let err = lookup("PLS-XY").unwrap_err();
        assert!(err.to_string().contains("PLS-XY"));
        assert!(err.to_string().contains("ZFM2030"));
    }

    #[test]
    fn calibrations_are_physical() {
        for (name, cal) in SUPPORTED_STAGES {
            assert!(cal.um_per_count > 0.0, "{name}");
            assert!(cal.travel_limit_um > 0.0, "{name}");
        }
    }
}
