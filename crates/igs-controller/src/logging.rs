//! Tracing setup for session binaries and tests.
//!
//! One `tracing-subscriber` fmt layer behind an [`EnvFilter`]. The level and
//! output format come from the `[application]` section; a `RUST_LOG` in the
//! environment replaces the configured level entirely.
//!
//! ```no_run
//! use igs_controller::{config::AppConfig, logging};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load_from("config/session.toml")?;
//! logging::init_from_config(&config)?;
//! tracing::info!(driver = %config.device.driver, "Session configured");
//! # Ok(())
//! # }
//! ```

use crate::config::AppConfig;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, colored output for interactive use
    #[default]
    Pretty,
    /// One line per event, never colored
    Compact,
    /// Newline-delimited JSON objects
    Json,
}

/// Subscriber options.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Most verbose level emitted when `RUST_LOG` is unset
    pub level: Level,
    /// Line format
    pub format: LogFormat,
    /// Emit span open/close events
    pub with_span_events: bool,
    /// Include source file and line
    pub with_file_and_line: bool,
    /// Include the emitting thread's name
    pub with_thread_names: bool,
    /// Colored output; only honored by [`LogFormat::Pretty`]
    pub with_ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            with_span_events: false,
            with_file_and_line: false,
            // Acquisition, cadence and watchdog threads are named.
            with_thread_names: true,
            with_ansi: true,
        }
    }
}

impl LoggingConfig {
    /// Settings taken from the `[application]` section.
    pub fn from_app_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let level = parse_log_level(&config.application.log_level)?;
        Ok(Self::new(level).with_format(config.application.log_format))
    }

    /// Defaults at `level`.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Replace the line format.
    #[must_use]
    pub fn with_format(self, format: LogFormat) -> Self {
        Self { format, ..self }
    }

    /// Toggle span open/close events.
    #[must_use]
    pub fn with_span_events(self, enabled: bool) -> Self {
        Self {
            with_span_events: enabled,
            ..self
        }
    }

    /// Toggle colored output.
    #[must_use]
    pub fn with_ansi(self, enabled: bool) -> Self {
        Self {
            with_ansi: enabled,
            ..self
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.level.as_str()))
    }

    fn span_events(&self) -> FmtSpan {
        if self.with_span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }

    fn layer(&self) -> BoxedLayer {
        let base = fmt::layer()
            .with_span_events(self.span_events())
            .with_file(self.with_file_and_line)
            .with_line_number(self.with_file_and_line)
            .with_thread_names(self.with_thread_names);
        let filter = self.filter();

        match self.format {
            LogFormat::Pretty => base
                .pretty()
                .with_ansi(self.with_ansi)
                .with_filter(filter)
                .boxed(),
            LogFormat::Compact => base.compact().with_ansi(false).with_filter(filter).boxed(),
            LogFormat::Json => base.json().with_filter(filter).boxed(),
        }
    }
}

/// Install the global subscriber described by `config.application`.
pub fn init_from_config(config: &AppConfig) -> Result<(), ConfigError> {
    init(LoggingConfig::from_app_config(config)?)
}

/// Install the global subscriber.
///
/// Calling this after another subscriber is in place (a test harness, an
/// embedding application, an earlier call) keeps the existing one and
/// returns `Ok(())`.
pub fn init(config: LoggingConfig) -> Result<(), ConfigError> {
    let result = tracing_subscriber::registry()
        .with(config.layer())
        .try_init();

    match result {
        Ok(()) => Ok(()),
        Err(e) if tracing::dispatcher::has_been_set() => {
            tracing::debug!(error = %e, "Keeping existing tracing subscriber");
            Ok(())
        }
        Err(e) => Err(ConfigError::Invalid(format!(
            "Failed to initialize tracing: {e}"
        ))),
    }
}

/// Level from its name, ignoring case.
pub fn parse_log_level(level: &str) -> Result<Level, ConfigError> {
    // `Level::from_str` also accepts "1".."5"; only names are valid here.
    if level.chars().all(|c| c.is_ascii_alphabetic()) {
        if let Ok(parsed) = Level::from_str(level) {
            return Ok(parsed);
        }
    }
    Err(ConfigError::Invalid(format!(
        "Invalid log level '{level}', expected trace, debug, info, warn or error"
    )))
}
