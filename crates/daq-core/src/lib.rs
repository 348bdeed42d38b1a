//! `daq-core`
//!
//! Core trait definitions and types shared by the stage driver crates.
//!
//! This crate provides the building blocks every serial motion driver needs:
//!
//! - [`error`]: [`DaqError`](error::DaqError), the shared error taxonomy
//! - [`serial`]: serial port opening and stray-byte detection helpers
//! - [`capabilities`]: the [`Movable`](capabilities::Movable) capability trait
//! - [`driver`]: the [`DriverFactory`](driver::DriverFactory) plugin API
//!
//! ## Example
//!
//! ```rust
//! use daq_core::error::DaqError;
//!
//! let err = DaqError::ChannelUnavailable(1);
//! assert!(!err.is_fatal());
//! ```

pub mod capabilities;
pub mod driver;
pub mod error;
pub mod serial;

// Re-export commonly used types
pub use anyhow::{anyhow, Result};
pub use error::{AppResult, DaqError};
