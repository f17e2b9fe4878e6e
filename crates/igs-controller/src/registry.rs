//! Strategy factory registry.
//!
//! Driver crates register a [`StrategyFactory`] per driver type at startup.
//! The controller resolves a [`DeviceConfig`](crate::config::DeviceConfig)'s
//! `driver` string here and hands the factory the `settings` table.
//!
//! ```rust,ignore
//! let registry = StrategyRegistry::new();
//! registry.register_factory(Box::new(MyTrackerFactory));
//! let strategy = registry.build("my_tracker", settings)?;
//! ```

use crate::error::{ControllerError, ControllerResult};
use dashmap::DashMap;
use igs_core::{DeviceStrategy, StrategyFactory};
use std::sync::Arc;
use tracing::{debug, info};

/// Information about a registered factory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactoryInfo {
    /// The driver type this factory handles
    pub driver_type: String,
    /// Human-readable factory name
    pub name: String,
}

/// Factories keyed by driver type.
///
/// Internally synchronized; share it as `Arc<StrategyRegistry>`.
#[derive(Default)]
pub struct StrategyRegistry {
    factories: DashMap<String, Box<dyn StrategyFactory>>,
}

impl StrategyRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the simulated tracker and imager already registered.
    pub fn with_simulated_devices() -> Self {
        let registry = Self::new();
        igs_driver_mock::register_all(&registry);
        registry
    }

    /// Register a factory, replacing and returning any previous factory for
    /// the same driver type.
    pub fn register_factory(
        &self,
        factory: Box<dyn StrategyFactory>,
    ) -> Option<Box<dyn StrategyFactory>> {
        let driver_type = factory.driver_type().to_string();
        info!(
            driver_type = %driver_type,
            name = %factory.name(),
            "Registering strategy factory"
        );
        self.factories.insert(driver_type, factory)
    }

    /// Remove the factory for `driver_type`.
    pub fn unregister_factory(&self, driver_type: &str) -> Option<Box<dyn StrategyFactory>> {
        self.factories
            .remove(driver_type)
            .map(|(_, factory)| factory)
    }

    /// Whether a factory handles `driver_type`.
    pub fn has_factory(&self, driver_type: &str) -> bool {
        self.factories.contains_key(driver_type)
    }

    /// Registered driver types, sorted.
    pub fn list_factories(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .factories
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        types.sort();
        types
    }

    /// Factory details for introspection.
    pub fn factory_info(&self, driver_type: &str) -> Option<FactoryInfo> {
        self.factories.get(driver_type).map(|entry| FactoryInfo {
            driver_type: entry.driver_type().to_string(),
            name: entry.name().to_string(),
        })
    }

    /// Check `settings` against the factory for `driver_type`.
    pub fn validate(&self, driver_type: &str, settings: &toml::Value) -> ControllerResult {
        let factory = self.lookup(driver_type)?;
        factory
            .validate(settings)
            .map_err(|e| ControllerError::Strategy {
                driver: driver_type.to_string(),
                message: format!("{e:#}"),
            })
    }

    /// Build a strategy for `driver_type` from `settings`.
    pub fn build(
        &self,
        driver_type: &str,
        settings: toml::Value,
    ) -> ControllerResult<Arc<dyn DeviceStrategy>> {
        let factory = self.lookup(driver_type)?;
        let strategy = factory
            .build(settings)
            .map_err(|e| ControllerError::Strategy {
                driver: driver_type.to_string(),
                message: format!("{e:#}"),
            })?;
        debug!(driver_type, "Strategy built");
        Ok(strategy)
    }

    fn lookup(
        &self,
        driver_type: &str,
    ) -> ControllerResult<dashmap::mapref::one::Ref<'_, String, Box<dyn StrategyFactory>>> {
        self.factories
            .get(driver_type)
            .ok_or_else(|| ControllerError::UnknownDriver {
                driver: driver_type.to_string(),
                available: self.list_factories(),
            })
    }
}

impl igs_driver_mock::FactoryRegistry for StrategyRegistry {
    fn register_factory(&self, factory: Box<dyn StrategyFactory>) {
        StrategyRegistry::register_factory(self, factory);
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("factories", &self.list_factories())
            .finish()
    }
}
