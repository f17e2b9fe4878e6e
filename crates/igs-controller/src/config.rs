//! Session configuration using Figment
//!
//! Configuration is loaded from:
//! 1. A TOML file (base configuration)
//! 2. Environment variables prefixed with `IGS_`, nested with `__`
//!
//! ```toml
//! [application]
//! name = "navigator"
//! log_level = "info"
//! log_format = "compact"
//!
//! [device]
//! driver = "sim_tracker"
//! frequency_hz = 30
//! update_timeout = "500ms"
//! max_consecutive_update_failures = 10
//!
//! [device.settings]
//! port = "sim://polaris"
//!
//! [device.reference]
//! name = "dynamic-ref"
//! kind = "port"
//! port = 1
//!
//! [[device.tools]]
//! name = "pointer"
//! kind = "port"
//! port = 2
//! calibration = { translation = [0.0, 0.0, -120.0] }
//! ```
//!
//! `IGS_DEVICE__FREQUENCY_HZ=60` overrides `device.frequency_hz`.

use crate::error::ConfigError;
use crate::logging::LogFormat;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use igs_core::session::{DEFAULT_FREQUENCY_HZ, DEFAULT_UPDATE_TIMEOUT, DEFAULT_VALIDITY_MS};
use igs_core::{SessionOptions, ToolDescriptor, ToolSpec, Transform};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "IGS_";

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// The device session to run
    pub device: DeviceConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "igs-session".into(),
            log_level: "info".into(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// One device session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Driver type; must match a registered strategy factory.
    pub driver: String,
    /// Update cadence.
    #[serde(default = "default_frequency")]
    pub frequency_hz: f64,
    /// Fetch on a dedicated acquisition thread.
    #[serde(default = "default_true")]
    pub threaded: bool,
    /// Drive updates from the cadence thread.
    #[serde(default = "default_true")]
    pub cadence: bool,
    /// Pin the sample validity instead of deriving it from the frequency.
    #[serde(default)]
    pub validity_ms: Option<f64>,
    /// Bound on the wait for an acquisition batch.
    #[serde(default = "default_update_timeout", with = "humantime_serde")]
    pub update_timeout: Duration,
    /// Stop streaming after this many consecutive failed updates. 0 disables.
    #[serde(default)]
    pub max_consecutive_update_failures: u32,
    /// World ("patient") transform applied to every published pose.
    #[serde(default)]
    pub world_transform: Option<TransformConfig>,
    /// Tool whose pose defines the moving frame.
    #[serde(default)]
    pub reference: Option<ToolConfig>,
    /// Regular tools.
    #[serde(default)]
    pub tools: Vec<ToolConfig>,
    /// Driver-specific settings handed to the strategy factory.
    #[serde(default = "empty_table")]
    pub settings: toml::Value,
}

fn default_frequency() -> f64 {
    DEFAULT_FREQUENCY_HZ
}

fn default_true() -> bool {
    true
}

fn default_update_timeout() -> Duration {
    DEFAULT_UPDATE_TIMEOUT
}

fn empty_table() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

/// One tool. Addressing fields sit next to `kind`:
/// `port`/`channel`, `path`, or `name` plus video geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Identifier override.
    #[serde(default)]
    pub name: Option<String>,
    /// Device addressing.
    #[serde(flatten)]
    pub spec: ToolSpec,
    /// Tool tip calibration.
    #[serde(default)]
    pub calibration: Option<TransformConfig>,
}

impl ToolConfig {
    /// Descriptor for `driver`. The calibration defaults to identity.
    pub fn descriptor(&self, driver: &str) -> Result<ToolDescriptor, ConfigError> {
        let mut descriptor = ToolDescriptor::new(driver, self.spec.clone());
        if let Some(name) = &self.name {
            descriptor = descriptor.with_name(name);
        }
        if let Some(calibration) = &self.calibration {
            descriptor = descriptor.with_calibration(calibration.to_transform()?);
        }
        Ok(descriptor)
    }
}

/// Rigid transform as written in configuration files.
///
/// Rotation is either a `[w, x, y, z]` quaternion or an axis-angle vector in
/// radians; neither means identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransformConfig {
    /// Translation in millimetres.
    pub translation: [f64; 3],
    /// Unit quaternion `[w, x, y, z]`.
    pub rotation: Option<[f64; 4]>,
    /// Rotation axis scaled by the angle in radians.
    pub axis_angle: Option<[f64; 3]>,
}

impl TransformConfig {
    /// Build the transform.
    pub fn to_transform(&self) -> Result<Transform, ConfigError> {
        if self.translation.iter().any(|v| !v.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "translation {:?} is not finite",
                self.translation
            )));
        }
        match (self.rotation, self.axis_angle) {
            (Some(_), Some(_)) => Err(ConfigError::Invalid(
                "give either rotation or axis_angle, not both".into(),
            )),
            (Some(q), None) => {
                let norm = q.iter().map(|c| c * c).sum::<f64>().sqrt();
                if !norm.is_finite() || norm < 1e-9 {
                    return Err(ConfigError::Invalid(format!(
                        "rotation quaternion {q:?} has no direction"
                    )));
                }
                Ok(Transform::from_parts(self.translation, q))
            }
            (None, Some(axis_angle)) => {
                if axis_angle.iter().any(|v| !v.is_finite()) {
                    return Err(ConfigError::Invalid(format!(
                        "axis_angle {axis_angle:?} is not finite"
                    )));
                }
                Ok(Transform::from_axis_angle(self.translation, axis_angle))
            }
            (None, None) => Ok(Transform::from_parts(
                self.translation,
                [1.0, 0.0, 0.0, 0.0],
            )),
        }
    }
}

impl DeviceConfig {
    /// Minimal configuration for `driver` with defaults everywhere else.
    pub fn new(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            frequency_hz: DEFAULT_FREQUENCY_HZ,
            threaded: true,
            cadence: true,
            validity_ms: None,
            update_timeout: DEFAULT_UPDATE_TIMEOUT,
            max_consecutive_update_failures: 0,
            world_transform: None,
            reference: None,
            tools: Vec::new(),
            settings: empty_table(),
        }
    }

    /// Session options before the frequency is applied.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            threaded: self.threaded,
            cadence: self.cadence,
            frequency_hz: if self.validity_ms.is_some() {
                self.frequency_hz
            } else {
                DEFAULT_FREQUENCY_HZ
            },
            validity_ms: self.validity_ms.unwrap_or(DEFAULT_VALIDITY_MS),
            update_timeout: self.update_timeout,
        }
    }

    /// Reference tool first, then the regular tools in file order.
    pub fn all_tools(&self) -> impl Iterator<Item = &ToolConfig> {
        self.reference.iter().chain(self.tools.iter())
    }

    /// Validate everything that can be checked without hardware.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.driver.trim().is_empty() {
            return Err(ConfigError::Invalid("device.driver must not be empty".into()));
        }
        if !self.frequency_hz.is_finite() || self.frequency_hz <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "device.frequency_hz must be positive, got {}",
                self.frequency_hz
            )));
        }
        if self.update_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "device.update_timeout must be greater than zero".into(),
            ));
        }
        if let Some(validity) = self.validity_ms {
            if !validity.is_finite() || validity <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "device.validity_ms must be positive, got {validity}"
                )));
            }
        }
        if let Some(world) = &self.world_transform {
            world.to_transform()?;
        }

        let mut ids = BTreeSet::new();
        for tool in self.all_tools() {
            let id = tool.descriptor(&self.driver)?.derive_identifier();
            if id.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "tool {:?} has no identifier",
                    tool.spec
                )));
            }
            if !ids.insert(id.clone()) {
                return Err(ConfigError::Invalid(format!("Duplicate tool identifier: {id}")));
            }
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load from a TOML file plus environment overrides, then validate.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::extract(Figment::new().merge(Toml::file(path.as_ref())))
    }

    /// Load from TOML text plus environment overrides, then validate.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Self::extract(Figment::new().merge(Toml::string(text)))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.application.log_level.to_lowercase();
        if !VALID_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LEVELS.join(", ")
            )));
        }
        self.device.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [device]
        driver = "sim_tracker"
    "#;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = AppConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.application, ApplicationConfig::default());
        assert_eq!(config.device, DeviceConfig::new("sim_tracker"));
    }

    #[test]
    fn test_tool_addressing_is_flattened() {
        let config = AppConfig::from_toml_str(
            r#"
            [device]
            driver = "sim_tracker"
            update_timeout = "250ms"

            [[device.tools]]
            kind = "port"
            port = 3
            channel = 1

            [[device.tools]]
            name = "us"
            kind = "video"
            width = 640
            height = 480
            channels = 1
            "#,
        )
        .unwrap();

        assert_eq!(config.device.update_timeout, Duration::from_millis(250));
        assert_eq!(
            config.device.tools[0].spec,
            ToolSpec::Port {
                port: 3,
                channel: Some(1)
            }
        );
        assert!(config.device.tools[1].spec.is_video());
        assert_eq!(config.device.tools[1].name.as_deref(), Some("us"));
    }

    #[test]
    fn test_transform_rotation_forms() {
        let identity = TransformConfig::default().to_transform().unwrap();
        assert!(identity.approx_eq(&Transform::identity(), 1e-12));

        let quarter = TransformConfig {
            axis_angle: Some([0.0, 0.0, std::f64::consts::FRAC_PI_2]),
            ..TransformConfig::default()
        }
        .to_transform()
        .unwrap();
        let from_quaternion = TransformConfig {
            rotation: Some([
                std::f64::consts::FRAC_1_SQRT_2,
                0.0,
                0.0,
                std::f64::consts::FRAC_1_SQRT_2,
            ]),
            ..TransformConfig::default()
        }
        .to_transform()
        .unwrap();
        assert!(quarter.approx_eq(&from_quaternion, 1e-9));

        let both = TransformConfig {
            rotation: Some([1.0, 0.0, 0.0, 0.0]),
            axis_angle: Some([0.0; 3]),
            ..TransformConfig::default()
        };
        assert!(both.to_transform().is_err());

        let degenerate = TransformConfig {
            rotation: Some([0.0; 4]),
            ..TransformConfig::default()
        };
        assert!(degenerate.to_transform().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut device = DeviceConfig::new("sim_tracker");
        device.frequency_hz = 0.0;
        assert!(device.validate().is_err());

        let mut device = DeviceConfig::new("sim_tracker");
        device.update_timeout = Duration::ZERO;
        assert!(device.validate().is_err());

        let mut device = DeviceConfig::new(" ");
        assert!(device.validate().is_err());
        device.driver = "sim_tracker".into();
        device.validity_ms = Some(-1.0);
        assert!(device.validate().is_err());
    }

    #[test]
    fn test_duplicate_identifiers_across_reference_and_tools() {
        let mut device = DeviceConfig::new("sim_tracker");
        device.reference = Some(ToolConfig {
            name: None,
            spec: ToolSpec::Port {
                port: 1,
                channel: None,
            },
            calibration: None,
        });
        device.tools.push(ToolConfig {
            name: Some("port-1".into()),
            spec: ToolSpec::Named {
                name: "pointer".into(),
            },
            calibration: None,
        });
        let err = device.validate().unwrap_err();
        assert!(err.to_string().contains("port-1"));
    }

    #[test]
    fn test_invalid_log_level() {
        let result = AppConfig::from_toml_str(
            r#"
            [application]
            log_level = "loud"
            [device]
            driver = "sim_tracker"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_pinned_validity_keeps_configured_frequency() {
        let mut device = DeviceConfig::new("sim_tracker");
        device.frequency_hz = 50.0;
        let options = device.session_options();
        assert_eq!(options.frequency_hz, DEFAULT_FREQUENCY_HZ);
        assert_eq!(options.validity_ms, DEFAULT_VALIDITY_MS);

        device.validity_ms = Some(100.0);
        let options = device.session_options();
        assert_eq!(options.frequency_hz, 50.0);
        assert_eq!(options.validity_ms, 100.0);
    }
}
