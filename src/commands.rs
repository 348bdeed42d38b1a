//! Subcommand implementations.
//!
//! Every command talks to the controller through an [`Mcm3000Handle`], so the
//! serial link has a single owner even when moves are left in flight.

use anyhow::{Context, Result};
use daq_core::error::DaqError;
use daq_driver_thorlabs::mcm3000::{
    ChannelId, ControllerConfig, Mcm3000Controller, Mcm3000Handle, SerialTransport,
    SimulatedMcm3000, SUPPORTED_STAGES,
};
use rand::Rng;
use std::fmt::Write as _;
use tracing::{info, warn};

/// Render the stage catalog as a table.
pub fn stage_table() -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<10} {:>14} {:>16}", "model", "um/count", "travel (um)");
    for (model, calibration) in SUPPORTED_STAGES {
        let _ = writeln!(
            out,
            "{:<10} {:>14.7} {:>16}",
            model,
            calibration.um_per_count,
            format!("+/-{:.1}", calibration.travel_limit_um)
        );
    }
    out
}

/// Operator advice for a failed command, if the cause is a driver error.
pub fn recovery_hint(err: &anyhow::Error) -> Option<&'static str> {
    let daq = err.chain().find_map(|cause| cause.downcast_ref::<DaqError>())?;
    let hint = match daq {
        DaqError::Connectivity { .. } => "check the cable and the port name, then retry",
        DaqError::ProtocolDesync(_) | DaqError::Io(_) | DaqError::Timeout(_) => {
            "the serial stream can no longer be trusted; power-cycle the controller and reconnect before moving again"
        }
        DaqError::PollLimitExceeded { .. } => {
            "the stage did not settle; check it for a jam before issuing further moves"
        }
        DaqError::OutOfRange { .. } => {
            "travel limits assume encoder zero is the mechanical center; re-zero only at center"
        }
        DaqError::ControllerClosed => "the controller was closed; reconnect",
        DaqError::Configuration(_) | DaqError::ChannelUnavailable(_) => {
            "check the [controller] section of the configuration"
        }
    };
    Some(hint)
}

/// Open the controller on `port`, or on a simulated device, and start its actor.
pub async fn connect(
    port: Option<&str>,
    simulate: bool,
    config: ControllerConfig,
) -> Result<Mcm3000Handle> {
    let controller = if simulate {
        info!("using simulated {}", config.name);
        let transport = SerialTransport::new(SimulatedMcm3000::new().connect());
        Mcm3000Controller::with_transport(transport, config).await?
    } else {
        let port = port.context("no serial port given (use --port or controller.port)")?;
        Mcm3000Controller::open(port, config).await?
    };
    Ok(Mcm3000Handle::spawn(controller))
}

/// Print and return the refreshed position.
pub async fn position(handle: &Mcm3000Handle, channel: ChannelId) -> Result<f64> {
    let position = handle.get_position_um(channel).await?;
    println!("{}: {:.2} um", channel, position);
    Ok(position)
}

/// Move and report the legalized position commanded.
///
/// With `block == false` the move is finished explicitly afterwards, the way a
/// caller doing other work in between would.
pub async fn move_stage(
    handle: &Mcm3000Handle,
    channel: ChannelId,
    um: f64,
    relative: bool,
    block: bool,
) -> Result<f64> {
    let commanded = handle.move_um(channel, um, relative, block).await?;
    println!("{}: commanded {:.2} um", channel, commanded);
    if !block {
        println!("{}: move in flight, finishing", channel);
        handle.finish_move(channel).await?;
    }
    position(handle, channel).await
}

/// Redefine the current position as zero.
pub async fn zero(handle: &Mcm3000Handle, channel: ChannelId) -> Result<()> {
    warn!(%channel, "zeroing encoder; travel limits assume the stage is at its mechanical center");
    handle.zero_encoder(channel).await?;
    println!("{}: encoder zeroed", channel);
    Ok(())
}

/// Demonstration routine covering every controller operation.
///
/// Returns the final position.
pub async fn exercise<R: Rng>(
    handle: &Mcm3000Handle,
    channel: ChannelId,
    rng: &mut R,
) -> Result<f64> {
    let um_per_count = handle.calibration(channel).await?.um_per_count;

    println!("\n# Re-set zero:");
    handle.move_um(channel, 1000.0, true, true).await?;
    handle.zero_encoder(channel).await?;
    handle.move_um(channel, 0.0, true, true).await?;

    println!("\n# Check cached position:");
    println!("-> position_um = {:.2}", handle.cached_position_um(channel).await?);

    println!("\n# Get updated position:");
    position(handle, channel).await?;

    println!("\n# Home:");
    handle.move_um(channel, 0.0, false, true).await?;

    println!("\n# Some relative moves:");
    for step in [1000.0, 1000.0, 1000.0, -1000.0, -1000.0, -1000.0] {
        let commanded = handle.move_um(channel, step, true, true).await?;
        println!("-> {:.2} um", commanded);
    }

    println!("\n# Legalized move:");
    let legal_um = handle.legalize(channel, 1000.0, true).await?;
    println!("-> legalized +1000 um to {:.2} um", legal_um);
    handle.move_um(channel, legal_um, false, true).await?;

    println!("\n# Some random absolute moves:");
    for _ in 0..3 {
        let target = f64::from(rng.gen_range(-1000..1000));
        let commanded = handle.move_um(channel, target, false, true).await?;
        println!("-> {:.0} um requested, {:.2} um commanded", target, commanded);
    }

    println!("\n# Non-blocking moves:");
    handle.move_um(channel, 2000.0, true, false).await?;
    handle.move_um(channel, 1000.0, true, false).await?;
    println!("(the second move finished the pending one first)");
    println!("doing something else");
    handle.finish_move(channel).await?;

    println!("\n# Encoder tolerance check:");
    for _ in 0..3 {
        handle.move_um(channel, 0.0, false, true).await?;
        handle.move_um(channel, um_per_count, false, true).await?;
    }

    position(handle, channel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_driver_thorlabs::mcm3000::ChannelConfig;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn config() -> ControllerConfig {
        ControllerConfig::new(vec![
            ChannelConfig::stage("ZFM2020"),
            ChannelConfig::default(),
            ChannelConfig::default(),
        ])
    }

    fn ch(index: u8) -> ChannelId {
        ChannelId::new(index).unwrap()
    }

    #[test]
    fn stage_table_lists_catalog() {
        let table = stage_table();
        for (model, _) in SUPPORTED_STAGES {
            assert!(table.contains(model));
        }
        assert!(table.contains("+/-12700.0"));
    }

    #[tokio::test]
    async fn connect_without_port_fails() {
        let err = connect(None, false, config()).await.unwrap_err();
        assert!(err.to_string().contains("no serial port"));
        assert_eq!(recovery_hint(&err), None);
    }

    #[tokio::test]
    async fn missing_port_gets_connectivity_hint() {
        let err = connect(Some("/dev/mcm3000-cli-missing"), false, config())
            .await
            .unwrap_err();
        assert_eq!(
            recovery_hint(&err),
            Some("check the cable and the port name, then retry")
        );
    }

    #[test]
    fn fatal_errors_advise_reconnect() {
        let err = anyhow::Error::from(DaqError::ProtocolDesync("1 stray byte".into()))
            .context("move ch0");
        assert!(recovery_hint(&err).unwrap().contains("reconnect"));

        let err = anyhow::Error::from(DaqError::ChannelUnavailable(1));
        assert!(recovery_hint(&err).unwrap().contains("configuration"));
    }

    #[tokio::test(start_paused = true)]
    async fn move_and_zero_on_simulator() {
        let handle = connect(None, true, config()).await.unwrap();

        let at = move_stage(&handle, ch(0), 250.0, false, false).await.unwrap();
        assert!((at - 250.0).abs() < 0.25);
        assert!(!handle.is_moving(ch(0)).await.unwrap());

        zero(&handle, ch(0)).await.unwrap();
        assert_eq!(position(&handle, ch(0)).await.unwrap(), 0.0);

        assert!(position(&handle, ch(1)).await.is_err());
        handle.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn exercise_ends_one_count_from_zero() {
        let handle = connect(None, true, config()).await.unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        let end = exercise(&handle, ch(0), &mut rng).await.unwrap();
        assert!((end - 0.2116667).abs() < 1e-9, "{end}");
        handle.close().await.unwrap();
    }
}
