//! Session controller for igs tracking devices.
//!
//! Ties configuration, the strategy factory registry and
//! [`igs_core::DeviceSession`] together:
//!
//! - [`config`]: figment-based TOML + environment configuration
//! - [`registry`]: driver type to [`igs_core::StrategyFactory`] lookup
//! - [`logging`]: tracing subscriber setup
//! - [`SessionController`]: blocking initialize/start/stop/shutdown
//!
//! ```rust,ignore
//! use igs_controller::{AppConfig, SessionController, StrategyRegistry};
//! use std::sync::Arc;
//!
//! let config = AppConfig::load_from("config/session.toml")?;
//! let controller = SessionController::new(Arc::new(StrategyRegistry::with_simulated_devices()));
//! controller.initialize(&config.device, None)?;
//! controller.start()?;
//! ```

pub mod config;
mod controller;
pub mod error;
pub mod logging;
pub mod registry;
mod watchdog;

pub use config::{AppConfig, ApplicationConfig, DeviceConfig, ToolConfig, TransformConfig};
pub use controller::SessionController;
pub use error::{ConfigError, ControllerError, ControllerResult};
pub use logging::{LogFormat, LoggingConfig};
pub use registry::{FactoryInfo, StrategyRegistry};
