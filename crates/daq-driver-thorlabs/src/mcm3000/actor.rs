//! Message-passing front end for a shared controller.
//!
//! The serial link has strict request/response framing, so it must have exactly
//! one reader and writer. [`Mcm3000Actor`] owns the [`Mcm3000Controller`] and
//! processes [`StageCommand`]s one at a time; any number of cloned
//! [`Mcm3000Handle`]s submit commands and await the reply.
//!
//! ```text
//! GUI / worker tasks                 Actor task
//! ------------------                 ----------
//! handle.move_um(..)  ── mpsc ──►    controller.move_um(..)
//!       await         ◄─ oneshot ─   response.send(result)
//! ```
//!
//! Commands are admitted FIFO, so operations on one channel run in submission
//! order. There is no cancellation: a blocking move occupies the actor until it
//! converges, and commands queued behind it wait.

use super::catalog::StageCalibration;
use super::channel::ChannelId;
use super::controller::Mcm3000Controller;
use super::transport::Transport;
use daq_core::error::{AppResult, DaqError};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Capacity of the command queue.
pub const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Commands accepted by [`Mcm3000Actor`].
///
/// Each variant carries the `oneshot::Sender` for its reply. Use the helper
/// constructors to get the matching receiver.
#[derive(Debug)]
pub enum StageCommand {
    /// List channels with an assigned stage.
    EnabledChannels {
        /// Response channel
        response: oneshot::Sender<Vec<ChannelId>>,
    },
    /// Calibration of an enabled channel.
    Calibration {
        /// Addressed channel
        channel: ChannelId,
        /// Response channel
        response: oneshot::Sender<AppResult<StageCalibration>>,
    },
    /// Re-read the encoder and return the position in micrometers.
    GetPosition {
        /// Addressed channel
        channel: ChannelId,
        /// Response channel
        response: oneshot::Sender<AppResult<f64>>,
    },
    /// Last position read, without touching the wire.
    CachedPosition {
        /// Addressed channel
        channel: ChannelId,
        /// Response channel
        response: oneshot::Sender<AppResult<f64>>,
    },
    /// Whether a move is in flight.
    IsMoving {
        /// Addressed channel
        channel: ChannelId,
        /// Response channel
        response: oneshot::Sender<AppResult<bool>>,
    },
    /// Check and quantize a request without moving.
    Legalize {
        /// Addressed channel
        channel: ChannelId,
        /// Requested position or offset
        requested_um: f64,
        /// Interpret `requested_um` relative to the live position
        relative: bool,
        /// Response channel, carries the legalized absolute position
        response: oneshot::Sender<AppResult<f64>>,
    },
    /// Legalize and move.
    MoveUm {
        /// Addressed channel
        channel: ChannelId,
        /// Requested position or offset
        move_um: f64,
        /// Interpret `move_um` relative to the live position
        relative: bool,
        /// Wait for convergence before replying
        block: bool,
        /// Response channel, carries the legalized position commanded
        response: oneshot::Sender<AppResult<f64>>,
    },
    /// Move to a raw encoder target.
    MoveToCounts {
        /// Addressed channel
        channel: ChannelId,
        /// Absolute encoder target
        counts: i32,
        /// Wait for convergence before replying
        block: bool,
        /// Response channel
        response: oneshot::Sender<AppResult<()>>,
    },
    /// Wait for the move in flight to converge.
    FinishMove {
        /// Addressed channel
        channel: ChannelId,
        /// Response channel
        response: oneshot::Sender<AppResult<()>>,
    },
    /// Redefine the current position as encoder zero.
    ZeroEncoder {
        /// Addressed channel
        channel: ChannelId,
        /// Response channel
        response: oneshot::Sender<AppResult<()>>,
    },
    /// Release the serial port and stop the actor.
    Close {
        /// Response channel
        response: oneshot::Sender<AppResult<()>>,
    },
}

impl StageCommand {
    /// Helper to create an EnabledChannels command
    pub fn enabled_channels() -> (Self, oneshot::Receiver<Vec<ChannelId>>) {
        let (tx, rx) = oneshot::channel();
        (Self::EnabledChannels { response: tx }, rx)
    }

    /// Helper to create a Calibration command
    pub fn calibration(channel: ChannelId) -> (Self, oneshot::Receiver<AppResult<StageCalibration>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Calibration { channel, response: tx }, rx)
    }

    /// Helper to create a GetPosition command
    pub fn get_position(channel: ChannelId) -> (Self, oneshot::Receiver<AppResult<f64>>) {
        let (tx, rx) = oneshot::channel();
        (Self::GetPosition { channel, response: tx }, rx)
    }

    /// Helper to create a CachedPosition command
    pub fn cached_position(channel: ChannelId) -> (Self, oneshot::Receiver<AppResult<f64>>) {
        let (tx, rx) = oneshot::channel();
        (Self::CachedPosition { channel, response: tx }, rx)
    }

    /// Helper to create an IsMoving command
    pub fn is_moving(channel: ChannelId) -> (Self, oneshot::Receiver<AppResult<bool>>) {
        let (tx, rx) = oneshot::channel();
        (Self::IsMoving { channel, response: tx }, rx)
    }

    /// Helper to create a Legalize command
    pub fn legalize(
        channel: ChannelId,
        requested_um: f64,
        relative: bool,
    ) -> (Self, oneshot::Receiver<AppResult<f64>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::Legalize {
                channel,
                requested_um,
                relative,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a MoveUm command
    pub fn move_um(
        channel: ChannelId,
        move_um: f64,
        relative: bool,
        block: bool,
    ) -> (Self, oneshot::Receiver<AppResult<f64>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::MoveUm {
                channel,
                move_um,
                relative,
                block,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a MoveToCounts command
    pub fn move_to_counts(
        channel: ChannelId,
        counts: i32,
        block: bool,
    ) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::MoveToCounts {
                channel,
                counts,
                block,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a FinishMove command
    pub fn finish_move(channel: ChannelId) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::FinishMove { channel, response: tx }, rx)
    }

    /// Helper to create a ZeroEncoder command
    pub fn zero_encoder(channel: ChannelId) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::ZeroEncoder { channel, response: tx }, rx)
    }

    /// Helper to create a Close command
    pub fn close() -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Close { response: tx }, rx)
    }
}

/// Task that owns a controller and executes [`StageCommand`]s sequentially.
pub struct Mcm3000Actor<T: Transport> {
    controller: Mcm3000Controller<T>,
}

impl<T: Transport + 'static> Mcm3000Actor<T> {
    /// Wrap a connected controller.
    pub fn new(controller: Mcm3000Controller<T>) -> Self {
        Self { controller }
    }

    /// Process commands until `Close` arrives or every handle is dropped.
    ///
    /// The controller is closed on both exit paths.
    pub async fn run(mut self, mut command_rx: mpsc::Receiver<StageCommand>) {
        let name = self.controller.name().to_string();
        info!(controller = %name, "stage actor started");

        while let Some(command) = command_rx.recv().await {
            debug!(controller = %name, ?command, "processing command");
            match command {
                StageCommand::EnabledChannels { response } => {
                    let _ = response.send(self.controller.enabled_channels());
                }
                StageCommand::Calibration { channel, response } => {
                    let result = self.controller.channel(channel).map(|s| s.calibration());
                    let _ = response.send(result);
                }
                StageCommand::GetPosition { channel, response } => {
                    let result = self.controller.get_position_um(channel).await;
                    let _ = response.send(self.observe(result));
                }
                StageCommand::CachedPosition { channel, response } => {
                    let _ = response.send(self.controller.cached_position_um(channel));
                }
                StageCommand::IsMoving { channel, response } => {
                    let _ = response.send(self.controller.is_moving(channel));
                }
                StageCommand::Legalize {
                    channel,
                    requested_um,
                    relative,
                    response,
                } => {
                    let result = self
                        .controller
                        .legalize(channel, requested_um, relative)
                        .await;
                    let _ = response.send(self.observe(result));
                }
                StageCommand::MoveUm {
                    channel,
                    move_um,
                    relative,
                    block,
                    response,
                } => {
                    let result = self
                        .controller
                        .move_um(channel, move_um, relative, block)
                        .await;
                    let _ = response.send(self.observe(result));
                }
                StageCommand::MoveToCounts {
                    channel,
                    counts,
                    block,
                    response,
                } => {
                    let result = self.controller.move_to_counts(channel, counts, block).await;
                    let _ = response.send(self.observe(result));
                }
                StageCommand::FinishMove { channel, response } => {
                    let result = self.controller.finish_move(channel).await;
                    let _ = response.send(self.observe(result));
                }
                StageCommand::ZeroEncoder { channel, response } => {
                    let result = self.controller.zero_encoder(channel).await;
                    let _ = response.send(self.observe(result));
                }
                StageCommand::Close { response } => {
                    // Handles observe the closed queue before the reply arrives.
                    command_rx.close();
                    let _ = response.send(self.controller.close().await);
                    info!(controller = %name, "stage actor stopped");
                    return;
                }
            }
        }

        warn!(controller = %name, "all handles dropped, closing controller");
        if let Err(e) = self.controller.close().await {
            error!(controller = %name, "failed to close controller: {}", e);
        }
    }

    fn observe<R>(&self, result: AppResult<R>) -> AppResult<R> {
        if let Err(e) = &result {
            if e.is_fatal() {
                error!(
                    controller = %self.controller.name(),
                    "fatal stage error, reconnect before further use: {}", e
                );
            }
        }
        result
    }
}

/// Cloneable client of a running [`Mcm3000Actor`].
#[derive(Clone)]
pub struct Mcm3000Handle {
    command_tx: mpsc::Sender<StageCommand>,
    name: Arc<str>,
}

impl std::fmt::Debug for Mcm3000Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mcm3000Handle")
            .field("name", &self.name)
            .field("closed", &self.command_tx.is_closed())
            .finish()
    }
}

impl Mcm3000Handle {
    /// Spawn an actor for `controller` on the current Tokio runtime.
    pub fn spawn<T: Transport + 'static>(controller: Mcm3000Controller<T>) -> Self {
        let name: Arc<str> = Arc::from(controller.name());
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        tokio::spawn(Mcm3000Actor::new(controller).run(command_rx));
        Self { command_tx, name }
    }

    /// Controller label.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }

    async fn request<R>(
        &self,
        (command, response): (StageCommand, oneshot::Receiver<AppResult<R>>),
    ) -> AppResult<R> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| DaqError::ControllerClosed)?;
        response.await.map_err(|_| DaqError::ControllerClosed)?
    }

    /// Channels with an assigned stage, ascending.
    pub async fn enabled_channels(&self) -> AppResult<Vec<ChannelId>> {
        let (command, response) = StageCommand::enabled_channels();
        self.command_tx
            .send(command)
            .await
            .map_err(|_| DaqError::ControllerClosed)?;
        response.await.map_err(|_| DaqError::ControllerClosed)
    }

    /// Calibration of an enabled channel.
    pub async fn calibration(&self, channel: ChannelId) -> AppResult<StageCalibration> {
        self.request(StageCommand::calibration(channel)).await
    }

    /// See [`Mcm3000Controller::get_position_um`].
    pub async fn get_position_um(&self, channel: ChannelId) -> AppResult<f64> {
        self.request(StageCommand::get_position(channel)).await
    }

    /// See [`Mcm3000Controller::cached_position_um`].
    pub async fn cached_position_um(&self, channel: ChannelId) -> AppResult<f64> {
        self.request(StageCommand::cached_position(channel)).await
    }

    /// See [`Mcm3000Controller::is_moving`].
    pub async fn is_moving(&self, channel: ChannelId) -> AppResult<bool> {
        self.request(StageCommand::is_moving(channel)).await
    }

    /// See [`Mcm3000Controller::legalize`].
    pub async fn legalize(
        &self,
        channel: ChannelId,
        requested_um: f64,
        relative: bool,
    ) -> AppResult<f64> {
        self.request(StageCommand::legalize(channel, requested_um, relative))
            .await
    }

    /// See [`Mcm3000Controller::move_um`].
    pub async fn move_um(
        &self,
        channel: ChannelId,
        move_um: f64,
        relative: bool,
        block: bool,
    ) -> AppResult<f64> {
        self.request(StageCommand::move_um(channel, move_um, relative, block))
            .await
    }

    /// See [`Mcm3000Controller::move_to_counts`].
    pub async fn move_to_counts(&self, channel: ChannelId, counts: i32, block: bool) -> AppResult<()> {
        self.request(StageCommand::move_to_counts(channel, counts, block))
            .await
    }

    /// See [`Mcm3000Controller::finish_move`].
    pub async fn finish_move(&self, channel: ChannelId) -> AppResult<()> {
        self.request(StageCommand::finish_move(channel)).await
    }

    /// See [`Mcm3000Controller::zero_encoder`].
    pub async fn zero_encoder(&self, channel: ChannelId) -> AppResult<()> {
        self.request(StageCommand::zero_encoder(channel)).await
    }

    /// Close the controller and stop the actor.
    ///
    /// # Errors
    ///
    /// [`DaqError::ControllerClosed`] if the actor already stopped.
    pub async fn close(&self) -> AppResult<()> {
        self.request(StageCommand::close()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcm3000::controller::tests::{zfm_config, MockTransport};
    use crate::mcm3000::protocol::Command;
    use std::sync::atomic::Ordering;

    fn ch(index: u8) -> ChannelId {
        ChannelId::new(index).unwrap()
    }

    async fn spawn_mock(mock: MockTransport) -> Mcm3000Handle {
        let controller = Mcm3000Controller::with_transport(mock, zfm_config())
            .await
            .unwrap();
        Mcm3000Handle::spawn(controller)
    }

    #[tokio::test(start_paused = true)]
    async fn handle_mirrors_controller_operations() {
        let handle = spawn_mock(MockTransport::default()).await;

        assert_eq!(handle.enabled_channels().await.unwrap(), vec![ch(0), ch(2)]);
        assert_eq!(handle.calibration(ch(2)).await.unwrap().um_per_count, 0.5);

        let legal = handle.legalize(ch(2), 10.2, false).await.unwrap();
        assert_eq!(legal, 10.0);

        let commanded = handle.move_um(ch(2), 10.2, false, false).await.unwrap();
        assert_eq!(commanded, 10.0);
        assert!(handle.is_moving(ch(2)).await.unwrap());
        handle.finish_move(ch(2)).await.unwrap();
        assert!(!handle.is_moving(ch(2)).await.unwrap());
        assert_eq!(handle.cached_position_um(ch(2)).await.unwrap(), 10.0);

        handle.move_to_counts(ch(0), -20, true).await.unwrap();
        handle.zero_encoder(ch(0)).await.unwrap();
        assert_eq!(handle.get_position_um(ch(0)).await.unwrap(), 0.0);

        assert!(matches!(
            handle.get_position_um(ch(1)).await,
            Err(DaqError::ChannelUnavailable(1))
        ));
        handle.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_clients_are_serialized_in_order() {
        let mock = MockTransport::default();
        let log = mock.log.clone();
        let handle = spawn_mock(mock).await;
        log.lock().clear();

        let a = handle.clone();
        let b = handle.clone();
        let first = a.move_to_counts(ch(0), 100, false);
        let second = b.move_to_counts(ch(0), 200, false);
        let (r1, r2) = tokio::join!(first, second);
        r1.unwrap();
        r2.unwrap();

        assert_eq!(
            *log.lock(),
            vec![
                Command::MoveAbsolute {
                    channel: 0,
                    counts: 100
                },
                Command::GetEncoderCount { channel: 0 },
                Command::MoveAbsolute {
                    channel: 0,
                    counts: 200
                },
            ]
        );
        handle.close().await.unwrap();
    }

    #[tokio::test]
    async fn second_close_reports_closed() {
        let mock = MockTransport::default();
        let closed = mock.closed.clone();
        let handle = spawn_mock(mock).await;

        handle.close().await.unwrap();
        assert!(closed.load(Ordering::SeqCst));
        assert!(matches!(
            handle.close().await,
            Err(DaqError::ControllerClosed)
        ));
        assert!(matches!(
            handle.get_position_um(ch(0)).await,
            Err(DaqError::ControllerClosed)
        ));
    }

    #[tokio::test]
    async fn dropping_all_handles_closes_controller() {
        let mock = MockTransport::default();
        let closed = mock.closed.clone();
        let handle = spawn_mock(mock).await;
        let clone = handle.clone();
        drop(handle);
        drop(clone);

        for _ in 0..100 {
            if closed.load(Ordering::SeqCst) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(closed.load(Ordering::SeqCst));
    }
}
