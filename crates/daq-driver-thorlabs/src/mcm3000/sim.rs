//! Software MCM3000 that speaks the binary protocol over an in-memory pipe.
//!
//! Each channel approaches its commanded target by a fixed number of counts per
//! position read, so the move engine's poll loop runs for real. Faults can be
//! injected to exercise the desync and non-convergence paths.
//!
//! ```rust,ignore
//! let sim = SimulatedMcm3000::new();
//! let transport = SerialTransport::new(sim.connect());
//! let controller = Mcm3000Controller::with_transport(transport, config).await?;
//! ```

use super::channel::CHANNEL_COUNT;
use super::protocol::{encode_encoder_response, Command};
use daq_core::serial::DynSerial;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

/// Default travel per position read, in counts.
pub const DEFAULT_STEP_COUNTS: i32 = 2000;

const PIPE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Default)]
struct SimState {
    encoder: [i32; CHANNEL_COUNT],
    target: [Option<i32>; CHANNEL_COUNT],
    stuck_offset: [i32; CHANNEL_COUNT],
    stray_bytes: Vec<u8>,
    wrong_echo: bool,
    frames: usize,
}

/// Simulated controller. Clones share the same device state.
#[derive(Debug, Clone)]
pub struct SimulatedMcm3000 {
    state: Arc<Mutex<SimState>>,
    step: i32,
}

impl Default for SimulatedMcm3000 {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedMcm3000 {
    /// All encoders at zero, [`DEFAULT_STEP_COUNTS`] per read.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::default())),
            step: DEFAULT_STEP_COUNTS,
        }
    }

    /// Set the travel per position read. Values below one are raised to one.
    pub fn with_step(mut self, step: i32) -> Self {
        self.step = step.max(1);
        self
    }

    /// Preset an encoder count.
    pub fn with_encoder(self, channel: u8, counts: i32) -> Self {
        if let Some(slot) = self.state.lock().encoder.get_mut(usize::from(channel)) {
            *slot = counts;
        }
        self
    }

    /// Current encoder count of a channel.
    pub fn encoder(&self, channel: u8) -> Option<i32> {
        self.state.lock().encoder.get(usize::from(channel)).copied()
    }

    /// Number of request frames served so far.
    pub fn frames_served(&self) -> usize {
        self.state.lock().frames
    }

    /// Append `bytes` after the next encoder reply.
    pub fn inject_stray_bytes(&self, bytes: &[u8]) {
        self.state.lock().stray_bytes.extend_from_slice(bytes);
    }

    /// Echo the wrong channel byte in encoder replies.
    pub fn set_wrong_echo(&self, enabled: bool) {
        self.state.lock().wrong_echo = enabled;
    }

    /// Make a channel settle `offset` counts away from every commanded target.
    pub fn set_stuck_offset(&self, channel: u8, offset: i32) {
        if let Some(slot) = self.state.lock().stuck_offset.get_mut(usize::from(channel)) {
            *slot = offset;
        }
    }

    /// Spawn the device on the current runtime and return the host end of the pipe.
    pub fn connect(&self) -> DynSerial {
        let (host, device) = tokio::io::duplex(PIPE_CAPACITY);
        let sim = self.clone();
        tokio::spawn(async move {
            if let Err(e) = sim.serve(device).await {
                warn!("simulated MCM3000 stopped: {}", e);
            }
        });
        Box::new(host)
    }

    /// Answer requests on `stream` until the host closes it.
    pub async fn serve<S>(&self, mut stream: S) -> std::io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut frame = Vec::with_capacity(16);
        loop {
            let mut opcode = [0u8; 1];
            if stream.read(&mut opcode).await? == 0 {
                debug!("simulated MCM3000: host disconnected");
                return Ok(());
            }
            let Some(len) = Command::frame_len(opcode[0]) else {
                warn!("simulated MCM3000: dropping unknown opcode {:#04X}", opcode[0]);
                continue;
            };
            frame.clear();
            frame.push(opcode[0]);
            frame.resize(len, 0);
            stream.read_exact(&mut frame[1..]).await?;
            trace!("simulated MCM3000 <- {:02X?}", frame);

            let Some(command) = Command::decode(&frame) else {
                warn!("simulated MCM3000: malformed frame {:02X?}", frame);
                continue;
            };
            if let Some(reply) = self.handle(command) {
                stream.write_all(&reply).await?;
                stream.flush().await?;
            }
        }
    }

    fn handle(&self, command: Command) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        state.frames += 1;
        let ch = usize::from(command.channel());
        if ch >= CHANNEL_COUNT {
            warn!("simulated MCM3000: channel {} does not exist", ch);
            return None;
        }
        match command {
            Command::GetEncoderCount { channel } => {
                if let Some(target) = state.target[ch] {
                    let current = state.encoder[ch];
                    let next = if (target - current).abs() <= self.step {
                        state.target[ch] = None;
                        target
                    } else {
                        current + self.step * (target - current).signum()
                    };
                    state.encoder[ch] = next;
                }
                let echo = if state.wrong_echo {
                    channel.wrapping_add(1)
                } else {
                    channel
                };
                let mut reply = encode_encoder_response(echo, state.encoder[ch]).to_vec();
                reply.append(&mut state.stray_bytes);
                Some(reply)
            }
            Command::ZeroEncoder { .. } => {
                state.encoder[ch] = 0;
                state.target[ch] = None;
                None
            }
            Command::MoveAbsolute { counts, .. } => {
                state.target[ch] = Some(counts.saturating_add(state.stuck_offset[ch]));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcm3000::protocol::decode_encoder_response;

    async fn exchange(port: &mut DynSerial, command: Command) -> Option<Vec<u8>> {
        port.write_all(&command.encode()).await.unwrap();
        let len = command.response_len()?;
        let mut buf = vec![0u8; len];
        port.read_exact(&mut buf).await.unwrap();
        Some(buf)
    }

    #[tokio::test]
    async fn approaches_target_step_by_step() {
        let sim = SimulatedMcm3000::new().with_step(100);
        let mut port = sim.connect();

        exchange(&mut port, Command::MoveAbsolute { channel: 1, counts: 250 }).await;
        let mut seen = Vec::new();
        for _ in 0..4 {
            let reply = exchange(&mut port, Command::GetEncoderCount { channel: 1 })
                .await
                .unwrap();
            seen.push(decode_encoder_response(1, &reply).unwrap());
        }
        assert_eq!(seen, vec![100, 200, 250, 250]);
        assert_eq!(sim.frames_served(), 5);
    }

    #[tokio::test]
    async fn zero_resets_encoder() {
        let sim = SimulatedMcm3000::new().with_encoder(0, -777);
        let mut port = sim.connect();
        exchange(&mut port, Command::ZeroEncoder { channel: 0 }).await;
        let reply = exchange(&mut port, Command::GetEncoderCount { channel: 0 })
            .await
            .unwrap();
        assert_eq!(decode_encoder_response(0, &reply).unwrap(), 0);
        assert_eq!(sim.encoder(0), Some(0));
    }

    #[tokio::test]
    async fn faults_are_visible_on_the_wire() {
        let sim = SimulatedMcm3000::new();
        let mut port = sim.connect();

        sim.set_wrong_echo(true);
        let reply = exchange(&mut port, Command::GetEncoderCount { channel: 2 })
            .await
            .unwrap();
        assert_eq!(reply[6], 3);
        sim.set_wrong_echo(false);

        sim.inject_stray_bytes(&[0xAA, 0xBB]);
        exchange(&mut port, Command::GetEncoderCount { channel: 0 }).await;
        let mut stray = [0u8; 2];
        port.read_exact(&mut stray).await.unwrap();
        assert_eq!(stray, [0xAA, 0xBB]);
    }

    #[tokio::test]
    async fn stuck_channel_settles_off_target() {
        let sim = SimulatedMcm3000::new().with_step(10_000);
        sim.set_stuck_offset(0, 3);
        let mut port = sim.connect();
        exchange(&mut port, Command::MoveAbsolute { channel: 0, counts: 40 }).await;
        exchange(&mut port, Command::GetEncoderCount { channel: 0 }).await;
        assert_eq!(sim.encoder(0), Some(43));
    }
}
