//! `DriverFactory` and `Movable` integration for MCM3000 axes.
//!
//! Each configured device is one axis. Axes on the same port share a controller
//! through [`crate::shared_controllers`].
//!
//! ```rust,ignore
//! let config = toml::toml! {
//!     port = "/dev/ttyUSB0"
//!     axis = 0
//!
//!     [[channels]]
//!     stage = "ZFM2020"
//!
//!     [[channels]]
//!
//!     [[channels]]
//! };
//! let components = Mcm3000Factory.build(config.into()).await?;
//! ```

use super::actor::Mcm3000Handle;
use super::channel::{ChannelConfig, ChannelId};
use super::controller::ControllerConfig;
use crate::shared_controllers::get_or_open_controller;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use daq_core::capabilities::{DeviceCategory, Movable};
use daq_core::driver::{Capability, DeviceComponents, DeviceMetadata, DriverFactory};
use futures::future::BoxFuture;
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

// =============================================================================
// Mcm3000Factory - DriverFactory implementation
// =============================================================================

/// Configuration for one MCM3000 axis
#[derive(Debug, Clone, Deserialize)]
pub struct Mcm3000Config {
    /// Serial port path (e.g., "/dev/ttyUSB0", "COM4")
    pub port: String,
    /// Channel driven by this device (0-2)
    pub axis: u8,
    /// Controller label (default: "MCM3000")
    #[serde(default)]
    pub name: Option<String>,
    /// All three channel entries of the controller
    pub channels: Vec<ChannelConfig>,
    /// Optional poll interval in milliseconds (default: 100)
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    /// Optional poll bound (default: wait forever)
    #[serde(default)]
    pub max_poll_attempts: Option<u32>,
}

impl Mcm3000Config {
    /// Controller configuration shared by every axis on this port.
    pub fn controller_config(&self) -> ControllerConfig {
        let mut config = ControllerConfig::new(self.channels.clone())
            .with_max_poll_attempts(self.max_poll_attempts);
        if let Some(name) = &self.name {
            config.name = name.clone();
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval_ms = ms;
        }
        config
    }

    /// Validate channel shape, stage models and that `axis` is enabled.
    ///
    /// Returns the axis handle and its travel limit.
    pub fn check(&self) -> Result<(ChannelId, f64)> {
        let axis = ChannelId::new(self.axis)?;
        let calibrations = self.controller_config().calibrations()?;
        let (_, calibration) = calibrations
            .into_iter()
            .find(|(id, _)| *id == axis)
            .ok_or_else(|| anyhow!("MCM3000 axis {} has no stage assigned", self.axis))?;
        Ok((axis, calibration.travel_limit_um))
    }
}

/// Factory for creating MCM3000 axis instances.
pub struct Mcm3000Factory;

/// Static capabilities for MCM3000 axes
static MCM3000_CAPABILITIES: &[Capability] = &[Capability::Movable];

impl DriverFactory for Mcm3000Factory {
    fn driver_type(&self) -> &'static str {
        "mcm3000"
    }

    fn name(&self) -> &'static str {
        "Thorlabs MCM3000 Stage Controller"
    }

    fn capabilities(&self) -> &'static [Capability] {
        MCM3000_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: Mcm3000Config = config.clone().try_into()?;
        cfg.check()?;
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: Mcm3000Config = config.try_into().context("Invalid MCM3000 config")?;
            let (axis, limit_um) = cfg.check()?;

            let handle = get_or_open_controller(&cfg.port, &cfg.controller_config()).await?;
            let driver = Arc::new(Mcm3000Axis::new(handle, axis));

            Ok(DeviceComponents::new()
                .with_category(DeviceCategory::Stage)
                .with_movable(driver)
                .with_metadata(DeviceMetadata {
                    category: Some(DeviceCategory::Stage),
                    position_units: Some("um".to_string()),
                    min_position: Some(-limit_um),
                    max_position: Some(limit_um),
                }))
        })
    }
}

// =============================================================================
// Mcm3000Axis
// =============================================================================

/// One channel of a shared MCM3000, exposed as a [`Movable`].
///
/// Moves are issued non-blocking; `wait_settled` finishes them.
#[derive(Debug, Clone)]
pub struct Mcm3000Axis {
    handle: Mcm3000Handle,
    channel: ChannelId,
}

impl Mcm3000Axis {
    /// Bind `channel` of a running controller.
    pub fn new(handle: Mcm3000Handle, channel: ChannelId) -> Self {
        Self { handle, channel }
    }

    /// Channel driven by this axis.
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Controller handle.
    pub fn handle(&self) -> &Mcm3000Handle {
        &self.handle
    }
}

#[async_trait]
impl Movable for Mcm3000Axis {
    #[instrument(skip(self), fields(channel = %self.channel), err)]
    async fn move_abs(&self, position: f64) -> Result<()> {
        self.handle
            .move_um(self.channel, position, false, false)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(channel = %self.channel), err)]
    async fn move_rel(&self, distance: f64) -> Result<()> {
        self.handle
            .move_um(self.channel, distance, true, false)
            .await?;
        Ok(())
    }

    async fn position(&self) -> Result<f64> {
        Ok(self.handle.get_position_um(self.channel).await?)
    }

    async fn wait_settled(&self) -> Result<()> {
        Ok(self.handle.finish_move(self.channel).await?)
    }
}
