//! Custom error types for stage drivers.
//!
//! This module defines the primary error type, `DaqError`, shared by the driver
//! crates and the command-line front end. Using the `thiserror` crate, it provides
//! a centralized and consistent way to report the failures a serial motion
//! controller can produce, from a port that will not open to a byte stream that
//! can no longer be trusted.
//!
//! ## Error Hierarchy
//!
//! - **`Connectivity`**: The serial connection could not be opened. Fatal at
//!   construction and never retried; the caller re-attempts construction.
//! - **`Configuration`**: Unsupported stage model, wrong channel count, invalid
//!   tolerance or calibration. Fatal at construction.
//! - **`ProtocolDesync`**: Leftover bytes after a response, or a response that
//!   echoes the wrong channel. Fatal, the stream is no longer framed correctly.
//! - **`OutOfRange`**: A requested position lies outside the travel envelope. The
//!   move is not issued.
//! - **`ChannelUnavailable`**: The addressed channel has no stage assigned.
//! - **`PollLimitExceeded`**: An opt-in poll bound was reached before the stage
//!   converged. Only produced when a bound is configured.
//!
//! No variant is retried automatically. Recovery (reconnect, re-zero) is an
//! application-level policy.

use thiserror::Error;

/// Convenience alias for results using the driver error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Primary error type for stage drivers.
///
/// # Example
///
/// ```rust
/// use daq_core::error::{AppResult, DaqError};
///
/// fn check_limit(requested_um: f64, limit_um: f64) -> AppResult<f64> {
///     if requested_um.abs() > limit_um {
///         return Err(DaqError::OutOfRange {
///             channel: 0,
///             requested_um,
///             limit_um,
///         });
///     }
///     Ok(requested_um)
/// }
///
/// assert!(check_limit(13_000.0, 12_700.0).is_err());
/// ```
#[derive(Error, Debug)]
pub enum DaqError {
    /// The serial connection could not be opened.
    ///
    /// **Error Type**: Permanent for this construction attempt.
    ///
    /// **Recovery Strategy**: Check cabling and port path, then construct the
    /// controller again. The driver never retries on its own.
    #[error("{device}: no connection on port {port}: {reason}")]
    Connectivity {
        /// Human-readable device name (e.g. "MCM3000")
        device: String,
        /// Serial port path that failed to open
        port: String,
        /// Underlying failure
        reason: String,
    },

    /// Configuration validation failed.
    ///
    /// Occurs when configuration values parse correctly but fail semantic
    /// validation (unknown stage model, channel count other than three,
    /// tolerance below one count).
    ///
    /// **Error Type**: Permanent - requires fixing the configuration values.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// The byte stream no longer matches the request/response framing.
    ///
    /// **Error Type**: Fatal - the connection must be closed and reopened.
    #[error("Protocol desync: {0}")]
    ProtocolDesync(String),

    /// A requested absolute position exceeds the channel's travel limit.
    ///
    /// **Error Type**: Permanent for this request; the move was not issued.
    #[error("ch{channel}: requested position {requested_um:.2}um exceeds travel limit +/-{limit_um:.2}um")]
    OutOfRange {
        /// Channel index
        channel: u8,
        /// Absolute position that was requested
        requested_um: f64,
        /// Symmetric travel limit of the stage
        limit_um: f64,
    },

    /// The addressed channel has no stage model assigned.
    #[error("ch{0}: channel is not available (no stage assigned)")]
    ChannelUnavailable(u8),

    /// A bounded poll loop gave up before the stage converged.
    ///
    /// **Recovery Strategy**: The move is still in flight on the device. Call
    /// finish-move again to keep waiting, or inspect the stage for a jam.
    #[error("ch{channel}: no convergence after {attempts} polls (target {target}, last read {last})")]
    PollLimitExceeded {
        /// Channel index
        channel: u8,
        /// Encoder count being waited for
        target: i32,
        /// Last encoder count read back
        last: i32,
        /// Number of reads performed
        attempts: u32,
    },

    /// A single serial read did not complete within the connection timeout.
    #[error("Serial read timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The controller task has stopped (closed or crashed).
    #[error("Controller is closed")]
    ControllerClosed,

    /// Standard I/O operation failed.
    ///
    /// **Source**: Wraps `std::io::Error` from the serial stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DaqError {
    /// Whether the error leaves the serial stream in an unknown framing state.
    ///
    /// After a fatal error the connection should be closed rather than reused.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DaqError::ProtocolDesync(_)
                | DaqError::Io(_)
                | DaqError::Timeout(_)
                | DaqError::ControllerClosed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DaqError::ChannelUnavailable(1);
        assert_eq!(err.to_string(), "ch1: channel is not available (no stage assigned)");
    }

    #[test]
    fn test_out_of_range_display() {
        let err = DaqError::OutOfRange {
            channel: 2,
            requested_um: 13000.0,
            limit_um: 12700.0,
        };
        assert_eq!(
            err.to_string(),
            "ch2: requested position 13000.00um exceeds travel limit +/-12700.00um"
        );
    }

    #[test]
    fn test_connectivity_display() {
        let err = DaqError::Connectivity {
            device: "MCM3000".into(),
            port: "COM4".into(),
            reason: "not found".into(),
        };
        assert!(err.to_string().starts_with("MCM3000: no connection on port COM4"));
    }

    #[test]
    fn test_fatality() {
        assert!(DaqError::ProtocolDesync("2 stray bytes".into()).is_fatal());
        assert!(!DaqError::ChannelUnavailable(1).is_fatal());
        assert!(!DaqError::Configuration("bad".into()).is_fatal());
    }
}
