//! Driver Factory and Component Types
//!
//! This module provides the plugin API for configuration-driven drivers.
//! Drivers implement [`DriverFactory`]; a composition root validates a TOML
//! section against the factory and then asks it to build the device.
//!
//! ```text
//! [devices.focus]            DriverFactory::validate()   DriverFactory::build()
//! type = "mcm3000"   ─────►  shape + semantic checks ──► opens port, returns
//! port = "/dev/ttyUSB0"                                   DeviceComponents
//! ```
//!
//! # Example: Implementing a Driver Factory
//!
//! ```rust,ignore
//! use daq_core::driver::{Capability, DeviceComponents, DriverFactory};
//! use futures::future::BoxFuture;
//!
//! pub struct MyStageFactory;
//!
//! impl DriverFactory for MyStageFactory {
//!     fn driver_type(&self) -> &'static str { "my_stage" }
//!     fn name(&self) -> &'static str { "My Stage" }
//!     fn capabilities(&self) -> &'static [Capability] { &[Capability::Movable] }
//!
//!     fn validate(&self, config: &toml::Value) -> anyhow::Result<()> {
//!         let _: MyStageConfig = config.clone().try_into()?;
//!         Ok(())
//!     }
//!
//!     fn build(&self, config: toml::Value) -> BoxFuture<'static, anyhow::Result<DeviceComponents>> {
//!         Box::pin(async move {
//!             let driver = std::sync::Arc::new(MyStage::open(config.try_into()?).await?);
//!             Ok(DeviceComponents::new().with_movable(driver))
//!         })
//!     }
//! }
//! ```

use crate::capabilities::{DeviceCategory, Movable};
use anyhow::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Capability Enum (Runtime Introspection)
// =============================================================================

/// Runtime capability flags for device introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Can move to positions (stages, rotation mounts)
    /// Corresponds to [`crate::capabilities::Movable`]
    Movable,
}

impl Capability {
    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Movable => "Movable",
        }
    }
}

// =============================================================================
// Device Components (Capability Bag)
// =============================================================================

/// Container for capability trait objects returned by drivers.
#[derive(Default)]
pub struct DeviceComponents {
    /// Device category for UI grouping
    pub category: Option<DeviceCategory>,

    /// Movable implementation (motion control)
    pub movable: Option<Arc<dyn Movable>>,

    /// Capability-specific metadata (units, ranges, etc.)
    pub metadata: DeviceMetadata,
}

impl DeviceComponents {
    /// Create a new empty DeviceComponents
    pub fn new() -> Self {
        Self::default()
    }

    /// Get list of capabilities this device supports
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut caps = Vec::new();
        if self.movable.is_some() {
            caps.push(Capability::Movable);
        }
        caps
    }

    /// Set device category
    pub fn with_category(mut self, category: DeviceCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Set Movable implementation
    pub fn with_movable(mut self, m: Arc<dyn Movable>) -> Self {
        self.movable = Some(m);
        self
    }

    /// Set device metadata
    pub fn with_metadata(mut self, metadata: DeviceMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

// =============================================================================
// Device Metadata
// =============================================================================

/// Capability-specific metadata for a device.
#[derive(Debug, Clone, Default)]
pub struct DeviceMetadata {
    /// Device category for UI grouping
    pub category: Option<DeviceCategory>,

    /// For Movable devices: position units (e.g., "um", "degrees")
    pub position_units: Option<String>,

    /// For Movable devices: minimum position
    pub min_position: Option<f64>,

    /// For Movable devices: maximum position
    pub max_position: Option<f64>,
}

// =============================================================================
// Driver Factory Trait
// =============================================================================

/// Trait for driver factories that create device instances.
///
/// The factory is responsible for:
///
/// 1. Declaring what driver type it handles (matching TOML `type` field)
/// 2. Validating configuration before instantiation
/// 3. Asynchronously creating the driver and returning capabilities
///
/// Factories must not hold mutable state across builds. If shared state is
/// needed (e.g., one controller per serial port), use internal synchronization.
pub trait DriverFactory: Send + Sync + 'static {
    /// Driver type name used in TOML config `type` field.
    fn driver_type(&self) -> &'static str;

    /// Human-readable name for documentation and error messages.
    fn name(&self) -> &'static str;

    /// List of capabilities this driver type provides.
    fn capabilities(&self) -> &'static [Capability] {
        &[]
    }

    /// Validate configuration without instantiating.
    ///
    /// Called before `build()` to provide early error feedback without touching
    /// hardware.
    fn validate(&self, config: &toml::Value) -> Result<()>;

    /// Async instantiation of the driver.
    ///
    /// Opens connections to hardware and returns the implemented capabilities.
    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_name() {
        assert_eq!(Capability::Movable.name(), "Movable");
    }

    #[test]
    fn test_device_components_builder() {
        let components = DeviceComponents::new()
            .with_category(DeviceCategory::Stage)
            .with_metadata(DeviceMetadata {
                position_units: Some("um".to_string()),
                min_position: Some(-12700.0),
                max_position: Some(12700.0),
                ..Default::default()
            });

        assert_eq!(components.category, Some(DeviceCategory::Stage));
        assert_eq!(components.metadata.position_units, Some("um".to_string()));
        assert!(components.capabilities().is_empty());
    }

    #[test]
    fn test_capability_serde() {
        let cap = Capability::Movable;
        let json = serde_json::to_string(&cap).unwrap();
        assert_eq!(json, "\"movable\"");

        let cap: Capability = serde_json::from_str("\"movable\"").unwrap();
        assert_eq!(cap, Capability::Movable);
    }
}
