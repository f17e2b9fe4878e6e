//! Operational modes for simulated devices.
//!
//! - **Instant**: Zero delays, deterministic behavior for unit tests
//! - **Realistic**: Device-like timing for integration tests and demos
//! - **Chaos**: Realistic timing plus random transport failures

use serde::Deserialize;

/// Operational modes for simulated devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MockMode {
    /// Zero delays, deterministic - for unit tests
    #[default]
    Instant,
    /// Device-like timing - for integration tests
    Realistic,
    /// Device-like timing with random failures - for resilience testing
    Chaos,
}

impl MockMode {
    /// Whether the timing presets should be honoured.
    pub fn simulates_timing(self) -> bool {
        !matches!(self, MockMode::Instant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode() {
        assert_eq!(MockMode::default(), MockMode::Instant);
    }

    #[test]
    fn test_only_instant_skips_timing() {
        assert!(!MockMode::Instant.simulates_timing());
        assert!(MockMode::Realistic.simulates_timing());
        assert!(MockMode::Chaos.simulates_timing());
    }

    #[test]
    fn test_mode_from_toml() {
        #[derive(Deserialize)]
        struct Settings {
            mode: MockMode,
        }
        let settings: Settings = toml::from_str("mode = \"realistic\"").unwrap();
        assert_eq!(settings.mode, MockMode::Realistic);
    }
}
