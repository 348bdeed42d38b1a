//! Serial Port Abstractions for Driver Crates
//!
//! This module provides shared types and utilities for async serial communication
//! that can be used by driver crates without duplicating definitions.
//!
//! # Feature Flag
//!
//! [`open_serial_async`] requires the `serial` feature:
//!
//! ```toml
//! [dependencies]
//! daq-core = { path = "../daq-core", features = ["serial"] }
//! ```
//!
//! # Types
//!
//! - [`SerialPortIO`]: Trait alias combining AsyncRead + AsyncWrite for serial ports
//! - [`DynSerial`]: Type-erased boxed serial port
//!
//! # Utilities
//!
//! - [`open_serial_async`]: Open a serial port with spawn_blocking
//! - [`read_available`]: Collect bytes that are already buffered, without waiting

use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

// =============================================================================
// Serial Port Trait
// =============================================================================

/// Trait alias for async serial port I/O.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` can be used
/// as a serial port. This includes:
/// - `tokio_serial::SerialStream` (real hardware)
/// - `tokio::io::DuplexStream` (testing and simulation)
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

// Blanket implementation for all types meeting the requirements
impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

// =============================================================================
// Serial Port Utilities
// =============================================================================

/// Open a serial port asynchronously using spawn_blocking.
///
/// This function wraps the serial port opening in `spawn_blocking` to avoid
/// blocking the async runtime during port initialization. Standard settings
/// are applied: 8N1, no flow control.
///
/// # Parameters
///
/// - `port_path`: Path to the serial port (e.g., "/dev/ttyUSB0", "COM4")
/// - `baud_rate`: Baud rate (e.g., 9600)
/// - `device_name`: Human-readable device name for error messages
/// - `timeout`: Per-call read timeout applied to the native port
///
/// # Errors
///
/// Returns [`DaqError::Connectivity`](crate::error::DaqError::Connectivity) if the
/// port cannot be opened. The open is not retried.
#[cfg(feature = "serial")]
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
    device_name: &str,
    timeout: std::time::Duration,
) -> crate::error::AppResult<tokio_serial::SerialStream> {
    use crate::error::DaqError;
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();
    let connectivity = |reason: String| DaqError::Connectivity {
        device: device_name.to_string(),
        port: port_path.to_string(),
        reason,
    };

    let opened = spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(timeout)
            .open_native_async()
    })
    .await
    .map_err(|e| connectivity(format!("spawn_blocking for serial port opening failed: {e}")))?;

    let port = opened.map_err(|e| connectivity(e.to_string()))?;
    tracing::info!(port = port_path, baud_rate, timeout_ms = ?timeout.as_millis(), "Opened {} serial port", device_name);
    Ok(port)
}

/// Collect every byte that is already available on the stream, without waiting.
///
/// Each read is polled exactly once: if the stream would have to wait for more
/// data the collection stops. End-of-stream also stops it. Used after a
/// request/response exchange to detect bytes the device sent beyond the
/// expected frame.
///
/// # Errors
///
/// Returns the underlying I/O error if an immediately-ready read fails.
pub fn read_available<R: AsyncRead + Unpin + ?Sized>(port: &mut R) -> std::io::Result<Vec<u8>> {
    let mut collected = Vec::new();
    let mut buf = [0u8; 64];

    loop {
        match port.read(&mut buf).now_or_never() {
            Some(Ok(0)) | None => break,
            Some(Ok(n)) => collected.extend_from_slice(&buf[..n]),
            Some(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Some(Err(e)) => return Err(e),
        }
    }

    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_dyn_serial_with_duplex() {
        let (mut host, device) = tokio::io::duplex(64);
        let mut port: DynSerial = Box::new(device);

        host.write_all(b"\x0a\x04").await.unwrap();

        let mut buf = [0u8; 2];
        port.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"\x0a\x04");
    }

    #[tokio::test]
    async fn test_read_available_collects_buffered_bytes() {
        let (mut host, mut device) = tokio::io::duplex(64);
        host.write_all(b"stale data 12345").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let stray = read_available(&mut device).unwrap();
        assert_eq!(stray, b"stale data 12345");

        // Nothing left afterwards
        assert!(read_available(&mut device).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_available_does_not_wait() {
        let (_host, mut device) = tokio::io::duplex(64);
        let stray = read_available(&mut device).unwrap();
        assert!(stray.is_empty());
    }

    #[tokio::test]
    async fn test_read_available_on_closed_peer() {
        let (host, mut device) = tokio::io::duplex(64);
        drop(host);
        assert!(read_available(&mut device).unwrap().is_empty());
    }
}
