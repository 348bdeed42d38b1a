//! Per-channel configuration, runtime state and unit conversion.

use super::catalog::{self, StageCalibration};
use daq_core::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of channels on every controller of the MCM3000 family.
pub const CHANNEL_COUNT: usize = 3;

/// Validated channel handle, `0..=2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(u8);

impl ChannelId {
    /// Validate a raw channel index.
    ///
    /// # Errors
    ///
    /// [`DaqError::Configuration`] if `index` is not `0..=2`.
    pub fn new(index: u8) -> AppResult<Self> {
        if usize::from(index) < CHANNEL_COUNT {
            Ok(Self(index))
        } else {
            Err(DaqError::Configuration(format!(
                "channel {} out of range 0..{}",
                index, CHANNEL_COUNT
            )))
        }
    }

    /// All three channels in ascending order.
    pub fn all() -> [ChannelId; CHANNEL_COUNT] {
        [ChannelId(0), ChannelId(1), ChannelId(2)]
    }

    /// Raw index as sent on the wire.
    pub fn index(self) -> u8 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// Configuration of one physical axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Stage model connected to this channel; `None` disables the channel
    #[serde(default)]
    pub stage: Option<String>,
    /// Invert the sign of the counts/micrometer mapping
    #[serde(default)]
    pub reversed: bool,
    /// Convergence window in encoder counts, at least 1
    #[serde(default = "default_tolerance_counts")]
    pub tolerance_counts: i32,
}

fn default_tolerance_counts() -> i32 {
    1
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            stage: None,
            reversed: false,
            tolerance_counts: default_tolerance_counts(),
        }
    }
}

impl ChannelConfig {
    /// An enabled, non-reversed channel with the default tolerance.
    pub fn stage(model: impl Into<String>) -> Self {
        Self {
            stage: Some(model.into()),
            ..Default::default()
        }
    }

    /// Set the reversal flag.
    pub fn reversed(mut self, reversed: bool) -> Self {
        self.reversed = reversed;
        self
    }

    /// Set the convergence window.
    pub fn with_tolerance(mut self, tolerance_counts: i32) -> Self {
        self.tolerance_counts = tolerance_counts;
        self
    }
}

/// Runtime state of one enabled channel.
///
/// `position_um` always mirrors the last encoder count *read* from the device.
/// `target_counts` is `Some` while a move is in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelState {
    id: ChannelId,
    model: String,
    calibration: StageCalibration,
    reversed: bool,
    tolerance_counts: i32,
    encoder_counts: i32,
    position_um: f64,
    target_counts: Option<i32>,
}

impl ChannelState {
    /// Build the state for an enabled channel from its configuration.
    ///
    /// Returns `Ok(None)` for a disabled channel.
    ///
    /// # Errors
    ///
    /// [`DaqError::Configuration`] for an unknown stage model or a tolerance
    /// below one count (a zero window can never be met and hangs polling).
    pub fn from_config(id: ChannelId, config: &ChannelConfig) -> AppResult<Option<Self>> {
        let Some(model) = config.stage.as_deref() else {
            return Ok(None);
        };
        let calibration = catalog::lookup(model)?;
        if config.tolerance_counts < 1 {
            return Err(DaqError::Configuration(format!(
                "{}: tolerance_counts must be >= 1, got {}",
                id, config.tolerance_counts
            )));
        }
        Ok(Some(Self {
            id,
            model: model.to_string(),
            calibration,
            reversed: config.reversed,
            tolerance_counts: config.tolerance_counts,
            encoder_counts: 0,
            position_um: 0.0,
            target_counts: None,
        }))
    }

    /// Channel handle.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Stage model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Stage calibration.
    pub fn calibration(&self) -> StageCalibration {
        self.calibration
    }

    /// Whether the mapping is sign-inverted.
    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    /// Convergence window in counts.
    pub fn tolerance_counts(&self) -> i32 {
        self.tolerance_counts
    }

    /// Last encoder count read from the device.
    pub fn encoder_counts(&self) -> i32 {
        self.encoder_counts
    }

    /// Position derived from the last encoder read.
    pub fn position_um(&self) -> f64 {
        self.position_um
    }

    /// Target of the move in flight, if any.
    pub fn target_counts(&self) -> Option<i32> {
        self.target_counts
    }

    /// Whether a move is in flight.
    pub fn is_moving(&self) -> bool {
        self.target_counts.is_some()
    }

    /// Whether `counts` lies within the tolerance window of the current target.
    ///
    /// Returns `true` when no move is in flight.
    pub fn has_converged(&self, counts: i32) -> bool {
        match self.target_counts {
            Some(target) => {
                let low = target.saturating_sub(self.tolerance_counts);
                let high = target.saturating_add(self.tolerance_counts);
                (low..=high).contains(&counts)
            }
            None => true,
        }
    }

    pub(crate) fn record_read(&mut self, counts: i32) {
        self.encoder_counts = counts;
        self.position_um = self.counts_to_um(counts);
    }

    pub(crate) fn set_target(&mut self, counts: i32) {
        self.target_counts = Some(counts);
    }

    pub(crate) fn clear_target(&mut self) {
        self.target_counts = None;
    }

    /// Largest encoder magnitude whose position stays within the travel limit.
    pub fn limit_counts(&self) -> i32 {
        (self.calibration.travel_limit_um / self.calibration.um_per_count).floor() as i32
    }

    /// Convert encoder counts to micrometers.
    pub fn counts_to_um(&self, counts: i32) -> f64 {
        counts_to_um(counts, self.calibration.um_per_count, self.reversed)
    }

    /// Convert micrometers to the nearest encoder count.
    pub fn um_to_counts(&self, um: f64) -> i32 {
        um_to_counts(um, self.calibration.um_per_count, self.reversed)
    }

    /// Check an absolute position against the travel envelope and quantize it.
    ///
    /// Returns the position that will actually be achieved after rounding to a
    /// whole encoder count. A request at the edge of travel snaps inward to
    /// [`limit_counts`](Self::limit_counts).
    ///
    /// # Errors
    ///
    /// [`DaqError::OutOfRange`] if clamping to `[-limit, +limit]` would change
    /// the value (this includes NaN).
    pub fn legalize_absolute(&self, requested_um: f64) -> AppResult<f64> {
        let limit_um = self.calibration.travel_limit_um;
        let clamped = requested_um.clamp(-limit_um, limit_um);
        if clamped != requested_um {
            return Err(DaqError::OutOfRange {
                channel: self.id.index(),
                requested_um,
                limit_um,
            });
        }
        let limit_counts = self.limit_counts();
        let counts = self.um_to_counts(clamped).clamp(-limit_counts, limit_counts);
        Ok(self.counts_to_um(counts))
    }
}

/// Encoder counts to micrometers: `counts * um_per_count`, negated if reversed.
///
/// Never returns `-0.0`.
pub fn counts_to_um(counts: i32, um_per_count: f64, reversed: bool) -> f64 {
    let um = f64::from(counts) * um_per_count;
    let signed = if reversed { -um } else { um };
    normalize_zero(signed)
}

/// Micrometers to encoder counts: `round(um / um_per_count)`, negated if reversed.
///
/// Rounds half to even. Values beyond the `i32` range saturate.
pub fn um_to_counts(um: f64, um_per_count: f64, reversed: bool) -> i32 {
    let counts = (um / um_per_count).round_ties_even() as i32;
    if reversed {
        counts.saturating_neg()
    } else {
        counts
    }
}

/// Replace a negative zero with positive zero.
fn normalize_zero(value: f64) -> f64 {
    if value == 0.0 {
        0.0
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZFM_UPC: f64 = 0.2116667;

    fn zfm(reversed: bool) -> ChannelState {
        let config = ChannelConfig::stage("ZFM2020").reversed(reversed);
        ChannelState::from_config(ChannelId::new(0).unwrap(), &config)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn channel_id_range() {
        assert!(ChannelId::new(0).is_ok());
        assert!(ChannelId::new(2).is_ok());
        assert!(matches!(
            ChannelId::new(3),
            Err(DaqError::Configuration(_))
        ));
        assert_eq!(ChannelId::new(1).unwrap().to_string(), "ch1");
    }

    #[test]
    fn disabled_channel_has_no_state() {
        let id = ChannelId::new(1).unwrap();
        assert!(ChannelState::from_config(id, &ChannelConfig::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn unknown_stage_is_configuration_error() {
        let id = ChannelId::new(0).unwrap();
        let err = ChannelState::from_config(id, &ChannelConfig::stage("XYZ")).unwrap_err();
        assert!(matches!(err, DaqError::Configuration(_)));
    }

    #[test]
    fn zero_tolerance_is_rejected() {
        let id = ChannelId::new(0).unwrap();
        let config = ChannelConfig::stage("ZFM2020").with_tolerance(0);
        assert!(matches!(
            ChannelState::from_config(id, &config),
            Err(DaqError::Configuration(_))
        ));
    }

    #[test]
    fn known_conversion_values() {
        assert_eq!(um_to_counts(1000.0, ZFM_UPC, false), 4724);
        let um = counts_to_um(4724, ZFM_UPC, false);
        assert!((um - 999.99349).abs() < 1e-4, "{um}");
        assert_eq!(um_to_counts(1000.0, ZFM_UPC, true), -4724);
        assert_eq!(um_to_counts(0.5, 0.5, false), 1);
    }

    #[test]
    fn rounding_is_half_to_even() {
        assert_eq!(um_to_counts(1.25, 0.5, false), 2);
        assert_eq!(um_to_counts(0.75, 0.5, false), 2);
        assert_eq!(um_to_counts(0.25, 0.5, false), 0);
        assert_eq!(um_to_counts(-0.25, 0.5, false), 0);
        assert_eq!(um_to_counts(-0.75, 0.5, false), -2);
    }

    #[test]
    fn reversed_negates_without_negative_zero() {
        for counts in [-5000, -1, 1, 4724, 60_000] {
            assert_eq!(
                counts_to_um(counts, ZFM_UPC, true),
                -counts_to_um(counts, ZFM_UPC, false)
            );
        }
        let zero = counts_to_um(0, ZFM_UPC, true);
        assert_eq!(zero, 0.0);
        assert!(zero.is_sign_positive());
    }

    #[test]
    fn round_trip_within_one_step() {
        for state in [zfm(false), zfm(true)] {
            let limit = state.calibration().travel_limit_um;
            let mut x = -limit;
            while x <= limit {
                let back = state.counts_to_um(state.um_to_counts(x));
                assert!((back - x).abs() <= ZFM_UPC, "{x} -> {back}");
                x += 37.3;
            }
        }
    }

    #[test]
    fn legalize_inside_envelope_quantizes() {
        let state = zfm(false);
        let legal = state.legalize_absolute(1000.0).unwrap();
        assert_eq!(legal, counts_to_um(4724, ZFM_UPC, false));
    }

    #[test]
    fn legalize_at_travel_edge_stays_inside_limit() {
        for state in [zfm(false), zfm(true)] {
            assert_eq!(state.limit_counts(), 59_999);
            for edge in [12_700.0, -12_700.0] {
                let legal = state.legalize_absolute(edge).unwrap();
                assert!(legal.abs() <= 12_700.0, "{edge} -> {legal}");
                assert_eq!(state.um_to_counts(legal).abs(), 59_999);
            }
        }
    }

    #[test]
    fn legalize_outside_envelope_is_out_of_range() {
        let state = zfm(true);
        for requested in [13_000.0, -12_700.5, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                state.legalize_absolute(requested),
                Err(DaqError::OutOfRange { channel: 0, .. })
            ));
        }
    }

    #[test]
    fn convergence_window() {
        let mut state = zfm(false);
        assert!(state.has_converged(123));
        state.set_target(100);
        assert!(state.is_moving());
        assert!(state.has_converged(99));
        assert!(state.has_converged(101));
        assert!(!state.has_converged(102));
        state.clear_target();
        assert!(!state.is_moving());
    }

    #[test]
    fn record_read_refreshes_position() {
        let mut state = zfm(true);
        state.record_read(4724);
        assert_eq!(state.encoder_counts(), 4724);
        assert_eq!(state.position_um(), -counts_to_um(4724, ZFM_UPC, false));
    }
}
