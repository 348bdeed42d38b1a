//! Shared controller registry.
//!
//! One MCM3000 drives three axes over a single serial port, and the port must
//! have exactly one owner. Each axis built by the factory asks this registry for
//! the controller actor of its port; the first caller opens it, later callers
//! reuse the same [`Mcm3000Handle`].

use crate::mcm3000::{ControllerConfig, Mcm3000Controller, Mcm3000Handle};
use anyhow::{bail, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Clone)]
struct SharedController {
    handle: Mcm3000Handle,
    config: ControllerConfig,
}

/// Module-local registry keyed by serial port path.
static SHARED_CONTROLLERS: OnceLock<RwLock<HashMap<String, SharedController>>> = OnceLock::new();

fn registry() -> &'static RwLock<HashMap<String, SharedController>> {
    SHARED_CONTROLLERS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Get the live controller for `port_path`, dropping a stopped one.
pub fn get_existing_controller(port_path: &str) -> Option<Mcm3000Handle> {
    let entry = registry().read().get(port_path).cloned()?;
    if entry.handle.is_closed() {
        remove_controller(port_path);
        return None;
    }
    Some(entry.handle)
}

/// Register a running controller for `port_path`.
pub fn register_controller(port_path: &str, handle: Mcm3000Handle, config: ControllerConfig) {
    registry()
        .write()
        .insert(port_path.to_string(), SharedController { handle, config });
    tracing::info!(port = port_path, "Registered shared MCM3000 controller");
}

/// Remove a controller from the registry without closing it.
pub fn remove_controller(port_path: &str) -> bool {
    let removed = registry().write().remove(port_path).is_some();
    if removed {
        tracing::info!(port = port_path, "Removed MCM3000 controller from registry");
    }
    removed
}

/// Get or open the controller for `port_path`.
///
/// # Errors
///
/// Fails if the port cannot be opened, or if it is already open with a
/// different controller configuration.
pub async fn get_or_open_controller(
    port_path: &str,
    config: &ControllerConfig,
) -> Result<Mcm3000Handle> {
    if let Some(handle) = get_existing_controller(port_path) {
        let matches = registry()
            .read()
            .get(port_path)
            .is_some_and(|entry| entry.config == *config);
        if !matches {
            bail!(
                "MCM3000 on {} is already open with a different channel configuration",
                port_path
            );
        }
        tracing::debug!(port = port_path, "Reusing shared MCM3000 controller");
        return Ok(handle);
    }

    let controller = Mcm3000Controller::open(port_path, config.clone()).await?;
    let handle = Mcm3000Handle::spawn(controller);
    register_controller(port_path, handle.clone(), config.clone());
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcm3000::{ChannelConfig, SerialTransport, SimulatedMcm3000};
    use daq_core::error::DaqError;

    fn config() -> ControllerConfig {
        ControllerConfig::new(vec![
            ChannelConfig::stage("ZFM2020"),
            ChannelConfig::default(),
            ChannelConfig::default(),
        ])
    }

    async fn sim_handle() -> Mcm3000Handle {
        let transport = SerialTransport::new(SimulatedMcm3000::new().connect());
        let controller = Mcm3000Controller::with_transport(transport, config())
            .await
            .unwrap();
        Mcm3000Handle::spawn(controller)
    }

    #[tokio::test]
    async fn registered_controller_is_reused() {
        let port = "sim://registry-reuse";
        register_controller(port, sim_handle().await, config());

        let first = get_or_open_controller(port, &config()).await.unwrap();
        let second = get_or_open_controller(port, &config()).await.unwrap();
        assert_eq!(first.name(), second.name());

        let mut other = config();
        other.channels[1] = ChannelConfig::stage("MMP-2XY");
        assert!(get_or_open_controller(port, &other).await.is_err());

        first.close().await.unwrap();
        assert!(get_existing_controller(port).is_none());
        assert!(!remove_controller(port));
    }

    #[tokio::test]
    async fn opening_missing_port_fails() {
        let port = "/dev/mcm3000-registry-missing";
        let err = get_or_open_controller(port, &config()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DaqError>(),
            Some(DaqError::Connectivity { .. })
        ));
        assert!(get_existing_controller(port).is_none());
    }
}
