//! Strategy factory trait.
//!
//! Every device backend crate implements [`StrategyFactory`] for each
//! strategy it provides and registers it with a registry at startup. The
//! registry picks the factory whose [`StrategyFactory::driver_type`] matches
//! the `driver` field of the device configuration.

use crate::strategy::DeviceStrategy;
use anyhow::Result;
use std::sync::Arc;

/// Creates [`DeviceStrategy`] instances from configuration.
///
/// Factories are registered once and live for the program's lifetime, so
/// they must be `Send + Sync + 'static` and must not hold mutable state
/// across builds.
///
/// # Error Handling
///
/// Both `validate()` and `build()` return `Result`. Validation errors should
/// be descriptive and actionable; `build()` is only called after `validate()`
/// has accepted the same value.
pub trait StrategyFactory: Send + Sync + 'static {
    /// Driver type name matched against the `driver` configuration field.
    ///
    /// Tools configured for a session must carry the same driver type.
    fn driver_type(&self) -> &'static str;

    /// Human-readable name for documentation and error messages.
    fn name(&self) -> &'static str;

    /// Validate the driver-specific `settings` table without building.
    fn validate(&self, settings: &toml::Value) -> Result<()>;

    /// Build a fresh strategy. No device I/O happens here; the transport is
    /// opened later by the session's `Open` request.
    fn build(&self, settings: toml::Value) -> Result<Arc<dyn DeviceStrategy>>;
}

impl std::fmt::Debug for dyn StrategyFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyFactory")
            .field("driver_type", &self.driver_type())
            .field("name", &self.name())
            .finish()
    }
}
