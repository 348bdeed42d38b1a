//! Thorlabs hardware drivers for rust-daq.
//!
//! This crate provides drivers for Thorlabs devices, including:
//! - MCM3000/MCM3001 three-channel stage controller (RS-232, binary protocol)
//!
//! # Usage
//!
//! Add to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! daq-driver-thorlabs = { path = "../daq-driver-thorlabs" }
//! ```
//!
//! Register the factory with your device registry:
//!
//! ```rust,ignore
//! use daq_driver_thorlabs::Mcm3000Factory;
//!
//! registry.register_factory(Box::new(Mcm3000Factory));
//! ```

pub mod mcm3000;
pub mod shared_controllers;

pub use mcm3000::{Mcm3000Axis, Mcm3000Controller, Mcm3000Factory, Mcm3000Handle};
pub use shared_controllers::get_or_open_controller;

/// Force the linker to include this crate.
///
/// Call this function from main() to ensure the driver factories are
/// linked into the final binary and not stripped by the linker.
#[inline(never)]
pub fn link() {
    std::hint::black_box(std::any::TypeId::of::<Mcm3000Factory>());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_does_not_panic() {
        link();
    }
}
