//! Command-line front end for Thorlabs MCM3000 stage controllers.
//!
//! The driver itself lives in `daq-driver-thorlabs`; this crate adds layered
//! configuration ([`config`]), tracing setup ([`logging`]) and the subcommand
//! implementations used by the `mcm_daq` binary ([`commands`]).

pub mod commands;
pub mod config;
pub mod logging;
