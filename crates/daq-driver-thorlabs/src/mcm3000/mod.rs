//! Thorlabs MCM3000/MCM3001 three-channel stage controller.
//!
//! Protocol: binary fixed-length frames over RS-232, 9600 baud, 8N1, little-endian
//!
//! | Layer | Module |
//! |---|---|
//! | Stage calibration table | [`catalog`] |
//! | Frame encoding | [`protocol`] |
//! | Request/response exchange | [`transport`] |
//! | Unit conversion and per-channel state | [`channel`] |
//! | Move engine and façade | [`controller`] |
//! | Single-owner task for shared use | [`actor`] |
//! | Device registry integration | [`factory`] |
//! | Software device | [`sim`] |
//!
//! # Usage
//!
//! ```rust,ignore
//! use daq_driver_thorlabs::mcm3000::{ChannelConfig, ChannelId, ControllerConfig, Mcm3000Controller};
//!
//! let config = ControllerConfig::new(vec![
//!     ChannelConfig::stage("ZFM2020"),
//!     ChannelConfig::default(),
//!     ChannelConfig::default(),
//! ]);
//! let mut stage = Mcm3000Controller::open("/dev/ttyUSB0", config).await?;
//! let focus = ChannelId::new(0)?;
//! let commanded = stage.move_um(focus, 1000.0, true, true).await?;
//! stage.close().await?;
//! ```

pub mod actor;
pub mod catalog;
pub mod channel;
pub mod controller;
pub mod factory;
pub mod protocol;
pub mod sim;
pub mod transport;

pub use actor::{Mcm3000Actor, Mcm3000Handle, StageCommand};
pub use catalog::{StageCalibration, SUPPORTED_STAGES};
pub use channel::{ChannelConfig, ChannelId, ChannelState, CHANNEL_COUNT};
pub use controller::{ControllerConfig, Mcm3000Controller, PollPolicy};
pub use factory::{Mcm3000Axis, Mcm3000Config, Mcm3000Factory};
pub use sim::SimulatedMcm3000;
pub use transport::{SerialTransport, Transport};
