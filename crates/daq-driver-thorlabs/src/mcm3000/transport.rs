//! Request/response transport over a single serial connection.

use async_trait::async_trait;
use daq_core::error::{AppResult, DaqError};
use daq_core::serial::{read_available, DynSerial};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::trace;

/// Serial line rate of the MCM3000 family.
pub const BAUD_RATE: u32 = 9600;
/// Per-read timeout of the connection.
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// A framed request/response exchange with the controller.
///
/// Implementations hold no channel semantics. Every call must leave the input
/// side empty; bytes beyond the expected response are a
/// [`DaqError::ProtocolDesync`] and are never retried.
#[async_trait]
pub trait Transport: Send {
    /// Write `frame`; if `response_len` is given, read exactly that many bytes.
    async fn send(&mut self, frame: &[u8], response_len: Option<usize>)
        -> AppResult<Option<Vec<u8>>>;

    /// Release the connection.
    async fn close(&mut self) -> AppResult<()>;
}

/// [`Transport`] over any async byte stream (serial port, duplex pipe).
pub struct SerialTransport {
    port: DynSerial,
    read_timeout: Duration,
}

impl SerialTransport {
    /// Wrap an open stream with the default 5 s read timeout.
    pub fn new(port: DynSerial) -> Self {
        Self::with_timeout(port, READ_TIMEOUT)
    }

    /// Wrap an open stream with a custom read timeout.
    pub fn with_timeout(port: DynSerial, read_timeout: Duration) -> Self {
        Self { port, read_timeout }
    }

    /// Open a serial port at 9600 baud, 8N1.
    ///
    /// # Errors
    ///
    /// [`DaqError::Connectivity`] if the port cannot be opened.
    pub async fn open(port_path: &str, device_name: &str) -> AppResult<Self> {
        let port =
            daq_core::serial::open_serial_async(port_path, BAUD_RATE, device_name, READ_TIMEOUT)
                .await?;
        Ok(Self::new(Box::new(port)))
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send(
        &mut self,
        frame: &[u8],
        response_len: Option<usize>,
    ) -> AppResult<Option<Vec<u8>>> {
        trace!("sending frame {:02X?}", frame);
        self.port.write_all(frame).await?;
        self.port.flush().await?;

        let response = match response_len {
            Some(len) => {
                let mut buf = vec![0u8; len];
                tokio::time::timeout(self.read_timeout, self.port.read_exact(&mut buf))
                    .await
                    .map_err(|_| DaqError::Timeout(self.read_timeout))??;
                trace!("-> response {:02X?}", buf);
                Some(buf)
            }
            None => None,
        };

        let stray = read_available(&mut self.port)?;
        if !stray.is_empty() {
            return Err(DaqError::ProtocolDesync(format!(
                "{} unexpected byte(s) after frame {:02X?}: {:02X?}",
                stray.len(),
                frame,
                stray
            )));
        }

        Ok(response)
    }

    async fn close(&mut self) -> AppResult<()> {
        self.port.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn send_without_response_writes_frame() {
        let (mut device, host) = duplex(64);
        let mut transport = SerialTransport::new(Box::new(host));

        let reply = transport.send(&[0x09, 0x04, 0x06], None).await.unwrap();
        assert!(reply.is_none());

        let mut buf = [0u8; 3];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x09, 0x04, 0x06]);
    }

    #[tokio::test]
    async fn send_reads_exact_response() {
        let (mut device, host) = duplex(64);
        let mut transport = SerialTransport::new(Box::new(host));

        device.write_all(&[1, 2, 3, 4]).await.unwrap();
        let reply = transport.send(&[0x0A], Some(4)).await.unwrap();
        assert_eq!(reply, Some(vec![1, 2, 3, 4]));
    }

    #[tokio::test]
    async fn leftover_bytes_are_protocol_desync() {
        let (mut device, host) = duplex(64);
        let mut transport = SerialTransport::new(Box::new(host));

        device.write_all(&[1, 2, 3, 4, 5, 6]).await.unwrap();
        let err = transport.send(&[0x0A], Some(4)).await.unwrap_err();
        assert!(matches!(err, DaqError::ProtocolDesync(_)));
        assert!(err.to_string().contains("2 unexpected byte(s)"));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_response_times_out() {
        let (_device, host) = duplex(64);
        let mut transport = SerialTransport::new(Box::new(host));

        let err = transport.send(&[0x0A], Some(12)).await.unwrap_err();
        assert!(matches!(err, DaqError::Timeout(d) if d == READ_TIMEOUT));
    }

    #[tokio::test]
    async fn close_shuts_down_write_side() {
        let (mut device, host) = duplex(64);
        let mut transport = SerialTransport::new(Box::new(host));
        transport.close().await.unwrap();

        let mut buf = [0u8; 1];
        assert_eq!(device.read(&mut buf).await.unwrap(), 0);
    }
}
