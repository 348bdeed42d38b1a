//! MCM3000 device controller: move engine and public façade.
//!
//! The controller owns the [`Transport`] and the runtime state of every enabled
//! channel. All operations take `&mut self`, so a single controller is one
//! mutual-exclusion domain for the serial link. Share it across tasks through
//! [`Mcm3000Handle`](super::actor::Mcm3000Handle), never by cloning the port.
//!
//! # Move state machine
//!
//! ```text
//!            move_to_counts (send ok)
//!   IDLE ───────────────────────────────► MOVING(target)
//!    ▲                                         │
//!    └──── finish_move: |read - target| <= tol ┘
//! ```
//!
//! Starting a move on a `MOVING` channel first runs `finish_move`, so motion is
//! never silently cancelled.
//!
//! # Poll bound
//!
//! By default `finish_move` and `zero_encoder` poll until the condition holds,
//! which blocks forever on a jammed motor. Set
//! [`ControllerConfig::max_poll_attempts`] to turn that into a
//! [`DaqError::PollLimitExceeded`].

use super::catalog::StageCalibration;
use super::channel::{ChannelConfig, ChannelId, ChannelState, CHANNEL_COUNT};
use super::protocol::{decode_encoder_response, Command};
use super::transport::{SerialTransport, Transport};
use daq_core::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Default interval between position reads while waiting for a move.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Controller configuration, usually deserialized from TOML.
///
/// ```toml
/// name = "MCM3000"
/// poll_interval_ms = 100
///
/// [[channels]]
/// stage = "ZFM2020"
///
/// [[channels]]
///
/// [[channels]]
/// stage = "MMP-2XY"
/// reversed = true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Label used in log lines and errors
    #[serde(default = "default_name")]
    pub name: String,
    /// Exactly three channel entries, in channel order
    pub channels: Vec<ChannelConfig>,
    /// Sleep between position reads while a move converges
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Give up waiting after this many reads (`None` waits forever)
    #[serde(default)]
    pub max_poll_attempts: Option<u32>,
}

fn default_name() -> String {
    "MCM3000".to_string()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

impl ControllerConfig {
    /// Configuration with default name and poll policy.
    pub fn new(channels: Vec<ChannelConfig>) -> Self {
        Self {
            name: default_name(),
            channels,
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: None,
        }
    }

    /// Set the poll bound.
    pub fn with_max_poll_attempts(mut self, max: Option<u32>) -> Self {
        self.max_poll_attempts = max;
        self
    }

    /// Poll policy described by this configuration.
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.max_poll_attempts,
        }
    }

    /// Validate without touching hardware.
    ///
    /// # Errors
    ///
    /// [`DaqError::Configuration`] for a channel count other than three, an
    /// unsupported stage model, a tolerance below one count or a zero poll
    /// bound.
    pub fn validate(&self) -> AppResult<()> {
        self.build_channels().map(|_| ())
    }

    /// Calibration of every enabled channel, for metadata and listings.
    pub fn calibrations(&self) -> AppResult<Vec<(ChannelId, StageCalibration)>> {
        Ok(self
            .build_channels()?
            .iter()
            .flatten()
            .map(|state| (state.id(), state.calibration()))
            .collect())
    }

    fn build_channels(&self) -> AppResult<[Option<ChannelState>; CHANNEL_COUNT]> {
        if self.channels.len() != CHANNEL_COUNT {
            return Err(DaqError::Configuration(format!(
                "{}: expected {} channel entries, got {}",
                self.name,
                CHANNEL_COUNT,
                self.channels.len()
            )));
        }
        if self.max_poll_attempts == Some(0) {
            return Err(DaqError::Configuration(
                "max_poll_attempts must be at least 1".to_string(),
            ));
        }
        let mut states: [Option<ChannelState>; CHANNEL_COUNT] = Default::default();
        for (id, config) in ChannelId::all().into_iter().zip(&self.channels) {
            states[usize::from(id.index())] = ChannelState::from_config(id, config)?;
        }
        Ok(states)
    }
}

/// How the move engine waits for convergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Sleep between reads
    pub interval: Duration,
    /// Maximum reads per wait, `None` for unbounded
    pub max_attempts: Option<u32>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: None,
        }
    }
}

/// Driver for a Thorlabs MCM3000/MCM3001 three-channel stage controller.
pub struct Mcm3000Controller<T: Transport = SerialTransport> {
    name: String,
    transport: T,
    channels: [Option<ChannelState>; CHANNEL_COUNT],
    poll: PollPolicy,
}

impl Mcm3000Controller<SerialTransport> {
    /// Validate `config`, open the serial port and read every enabled channel once.
    ///
    /// # Errors
    ///
    /// - [`DaqError::Configuration`] if the configuration is invalid (the port is
    ///   not opened)
    /// - [`DaqError::Connectivity`] if the port cannot be opened
    /// - any transport error raised by the initial position reads
    pub async fn open(port_path: &str, config: ControllerConfig) -> AppResult<Self> {
        config.validate()?;
        let transport = SerialTransport::open(port_path, &config.name).await?;
        Self::with_transport(transport, config).await
    }
}

impl<T: Transport> Mcm3000Controller<T> {
    /// Build a controller over an already connected transport.
    ///
    /// Performs one encoder read per enabled channel to seed its position.
    pub async fn with_transport(transport: T, config: ControllerConfig) -> AppResult<Self> {
        let channels = config.build_channels()?;
        let mut controller = Self {
            name: config.name.clone(),
            transport,
            channels,
            poll: config.poll_policy(),
        };
        for id in controller.enabled_channels() {
            controller.read_encoder(id).await?;
        }
        info!(
            controller = %controller.name,
            channels = ?controller.enabled_channels(),
            "controller ready"
        );
        Ok(controller)
    }

    /// Controller label.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Active poll policy.
    pub fn poll_policy(&self) -> PollPolicy {
        self.poll
    }

    /// Channels with an assigned stage, ascending.
    pub fn enabled_channels(&self) -> Vec<ChannelId> {
        self.channels.iter().flatten().map(ChannelState::id).collect()
    }

    /// Runtime state of an enabled channel.
    ///
    /// # Errors
    ///
    /// [`DaqError::ChannelUnavailable`] if no stage is assigned.
    pub fn channel(&self, channel: ChannelId) -> AppResult<&ChannelState> {
        self.channels[usize::from(channel.index())]
            .as_ref()
            .ok_or(DaqError::ChannelUnavailable(channel.index()))
    }

    fn channel_mut(&mut self, channel: ChannelId) -> AppResult<&mut ChannelState> {
        self.channels[usize::from(channel.index())]
            .as_mut()
            .ok_or(DaqError::ChannelUnavailable(channel.index()))
    }

    /// Last position read from hardware, without a round trip.
    pub fn cached_position_um(&self, channel: ChannelId) -> AppResult<f64> {
        Ok(self.channel(channel)?.position_um())
    }

    /// Whether a move is in flight on `channel`.
    pub fn is_moving(&self, channel: ChannelId) -> AppResult<bool> {
        Ok(self.channel(channel)?.is_moving())
    }

    async fn read_encoder(&mut self, channel: ChannelId) -> AppResult<i32> {
        self.channel(channel)?;
        let command = Command::GetEncoderCount {
            channel: channel.index(),
        };
        let response = self
            .transport
            .send(&command.encode(), command.response_len())
            .await?
            .ok_or_else(|| {
                DaqError::ProtocolDesync(format!("{}: no encoder reply", channel))
            })?;
        let counts = decode_encoder_response(channel.index(), &response)?;
        self.channel_mut(channel)?.record_read(counts);
        Ok(counts)
    }

    /// Re-read the encoder and return the refreshed position.
    #[instrument(skip(self), fields(controller = %self.name), err)]
    pub async fn get_position_um(&mut self, channel: ChannelId) -> AppResult<f64> {
        self.read_encoder(channel).await?;
        let position = self.cached_position_um(channel)?;
        debug!(position_um = position, "position read");
        Ok(position)
    }

    /// Check a request against the travel envelope and quantize it.
    ///
    /// A relative request is first added to the *live* encoder position, so
    /// motion made with the joystick since the last read is honoured. Another
    /// actor moving the stage between that read and the following move is not
    /// detected.
    ///
    /// # Errors
    ///
    /// [`DaqError::OutOfRange`] if the absolute position lies outside
    /// `[-limit, +limit]`.
    #[instrument(skip(self), fields(controller = %self.name), err)]
    pub async fn legalize(
        &mut self,
        channel: ChannelId,
        requested_um: f64,
        relative: bool,
    ) -> AppResult<f64> {
        let absolute_um = if relative {
            self.get_position_um(channel).await? + requested_um
        } else {
            requested_um
        };
        self.channel(channel)?.legalize_absolute(absolute_um)
    }

    /// Command an absolute encoder target.
    ///
    /// A move already in flight on `channel` is finished first. With `block`
    /// the call returns once the stage has converged; otherwise the channel is
    /// left `MOVING` until [`finish_move`](Self::finish_move) or the next move.
    ///
    /// # Errors
    ///
    /// [`DaqError::OutOfRange`] if `counts` lies beyond the travel limit.
    #[instrument(skip(self), fields(controller = %self.name), err)]
    pub async fn move_to_counts(
        &mut self,
        channel: ChannelId,
        counts: i32,
        block: bool,
    ) -> AppResult<()> {
        let state = self.channel(channel)?;
        let limit_um = state.calibration().travel_limit_um;
        let limit_counts = state.limit_counts();
        if counts.saturating_abs() > limit_counts {
            return Err(DaqError::OutOfRange {
                channel: channel.index(),
                requested_um: state.counts_to_um(counts),
                limit_um,
            });
        }

        if state.is_moving() {
            debug!("previous move still in flight, finishing it first");
            self.finish_move(channel).await?;
        }

        let command = Command::MoveAbsolute {
            channel: channel.index(),
            counts,
        };
        self.transport.send(&command.encode(), None).await?;
        self.channel_mut(channel)?.set_target(counts);
        debug!(target = counts, "move issued");

        if block {
            self.finish_move(channel).await?;
        }
        Ok(())
    }

    /// Wait until the move in flight on `channel` converges.
    ///
    /// No-op on an idle channel.
    ///
    /// # Errors
    ///
    /// [`DaqError::PollLimitExceeded`] if a poll bound is configured and is
    /// reached; the channel stays `MOVING`.
    #[instrument(skip(self), fields(controller = %self.name), err)]
    pub async fn finish_move(&mut self, channel: ChannelId) -> AppResult<()> {
        let Some(target) = self.channel(channel)?.target_counts() else {
            return Ok(());
        };
        let mut attempts = 0u32;
        loop {
            let counts = self.read_encoder(channel).await?;
            attempts += 1;
            let state = self.channel_mut(channel)?;
            if state.has_converged(counts) {
                state.clear_target();
                debug!(counts, attempts, "move finished");
                return Ok(());
            }
            self.check_poll_limit(channel, target, counts, attempts)?;
            tokio::time::sleep(self.poll.interval).await;
        }
    }

    /// Legalize and issue a move in micrometers.
    ///
    /// Returns the legalized position actually commanded.
    #[instrument(skip(self), fields(controller = %self.name), err)]
    pub async fn move_um(
        &mut self,
        channel: ChannelId,
        move_um: f64,
        relative: bool,
        block: bool,
    ) -> AppResult<f64> {
        let legal_um = self.legalize(channel, move_um, relative).await?;
        let counts = self.channel(channel)?.um_to_counts(legal_um);
        self.move_to_counts(channel, counts, block).await?;
        info!(legal_um, counts, "moved");
        Ok(legal_um)
    }

    /// Redefine the current physical position of `channel` as count 0.
    ///
    /// Travel limits are symmetric around zero, so this must only be called
    /// with the stage at its mechanical center. A pending move is finished
    /// first.
    #[instrument(skip(self), fields(controller = %self.name), err)]
    pub async fn zero_encoder(&mut self, channel: ChannelId) -> AppResult<()> {
        if self.is_moving(channel)? {
            self.finish_move(channel).await?;
        }
        let command = Command::ZeroEncoder {
            channel: channel.index(),
        };
        self.transport.send(&command.encode(), None).await?;

        let mut attempts = 0u32;
        loop {
            let counts = self.read_encoder(channel).await?;
            attempts += 1;
            if counts == 0 {
                info!(attempts, "encoder zeroed");
                return Ok(());
            }
            self.check_poll_limit(channel, 0, counts, attempts)?;
            tokio::time::sleep(self.poll.interval).await;
        }
    }

    fn check_poll_limit(
        &self,
        channel: ChannelId,
        target: i32,
        last: i32,
        attempts: u32,
    ) -> AppResult<()> {
        match self.poll.max_attempts {
            Some(max) if attempts >= max => {
                warn!(%channel, target, last, attempts, "poll limit reached");
                Err(DaqError::PollLimitExceeded {
                    channel: channel.index(),
                    target,
                    last,
                    attempts,
                })
            }
            _ => Ok(()),
        }
    }

    /// Release the serial connection.
    #[instrument(skip(self), fields(controller = %self.name), err)]
    pub async fn close(mut self) -> AppResult<()> {
        for state in self.channels.iter().flatten() {
            if state.is_moving() {
                warn!(channel = %state.id(), "closing with a move in flight");
            }
        }
        self.transport.close().await?;
        info!("connection closed");
        Ok(())
    }
}
