//! Capability traits for hardware devices.
//!
//! Drivers expose what they can do through small, focused traits rather than one
//! monolithic device interface. Motion hardware implements [`Movable`]; the
//! [`DeviceCategory`] tag lets front ends group devices without inspecting
//! trait objects.
//!
//! # Example
//!
//! ```rust,ignore
//! use daq_core::capabilities::Movable;
//!
//! async fn step_and_settle<M: Movable>(axis: &M, step: f64) -> anyhow::Result<f64> {
//!     axis.move_rel(step).await?;
//!     axis.wait_settled().await?;
//!     axis.position().await
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;

/// Device category for UI grouping and listing.
///
/// Drivers should explicitly set their category in
/// [`DeviceMetadata`](crate::driver::DeviceMetadata).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceCategory {
    /// Motion stages and actuators (Movable)
    Stage,
    /// Devices that don't fit other categories
    #[default]
    Other,
}

impl DeviceCategory {
    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Stage => "Stages",
            Self::Other => "Other",
        }
    }
}

// =============================================================================
// Capability Traits
// =============================================================================

/// Capability: Motion Control
///
/// Devices that can move to positions (stages, actuators, goniometers).
///
/// # Contract
/// - Positions are in device-native units (micrometers for linear stages)
/// - `move_abs` and `move_rel` initiate motion but may return before completion
/// - `wait_settled` resolves once motion completes
/// - `position` returns current position (may be approximate during motion)
///
/// # Thread Safety
/// - All methods are async and require `&self` (immutable reference)
/// - Implementations serialize hardware access internally
#[async_trait]
pub trait Movable: Send + Sync {
    /// Move to absolute position
    ///
    /// # Returns
    /// - Ok(()) if motion initiated successfully
    /// - Err if position is out of range or hardware error
    async fn move_abs(&self, position: f64) -> Result<()>;

    /// Move relative to current position
    ///
    /// # Returns
    /// - Ok(()) if motion initiated successfully
    /// - Err if resulting position would be out of range
    async fn move_rel(&self, distance: f64) -> Result<()>;

    /// Get current position
    async fn position(&self) -> Result<f64>;

    /// Wait for motion to settle
    ///
    /// # Returns
    /// - Ok(()) when settled
    /// - Err on hardware error, or when the implementation bounds the wait
    async fn wait_settled(&self) -> Result<()>;

    /// Stop motion immediately
    ///
    /// # Default Implementation
    /// Returns an error indicating stop is not supported.
    async fn stop(&self) -> Result<()> {
        anyhow::bail!("Stop not supported by this device")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedAxis;

    #[async_trait]
    impl Movable for FixedAxis {
        async fn move_abs(&self, _position: f64) -> Result<()> {
            Ok(())
        }
        async fn move_rel(&self, _distance: f64) -> Result<()> {
            Ok(())
        }
        async fn position(&self) -> Result<f64> {
            Ok(1.5)
        }
        async fn wait_settled(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_default_stop_is_unsupported() {
        let axis = FixedAxis;
        assert!(axis.stop().await.is_err());
        assert_eq!(axis.position().await.unwrap(), 1.5);
    }

    #[test]
    fn test_category_label() {
        assert_eq!(DeviceCategory::Stage.label(), "Stages");
        assert_eq!(DeviceCategory::default(), DeviceCategory::Other);
    }
}
