//! Timing configuration for realistic mode.
//!
//! Defines device-like delays so that the acquisition thread, the bounded
//! update wait and the open progress callback see realistic pacing.

use super::mode::MockMode;
use std::time::Duration;

/// Timing configuration for realistic mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingConfig {
    /// Time one device fetch takes in milliseconds (the device frame period)
    pub fetch_period_ms: u64,
    /// Transport handshake time in milliseconds, spread over open progress
    pub open_delay_ms: u64,
    /// Round trip for any other command in milliseconds
    pub command_delay_ms: u64,
}

impl TimingConfig {
    /// Optical tracker streaming at 60 Hz.
    pub fn tracker() -> Self {
        Self {
            fetch_period_ms: 16,
            open_delay_ms: 200,
            command_delay_ms: 2,
        }
    }

    /// Frame grabber at 30 fps.
    pub fn imager() -> Self {
        Self {
            fetch_period_ms: 33,
            open_delay_ms: 100,
            command_delay_ms: 5,
        }
    }

    /// Delay before a fetch returns in `mode`.
    pub fn fetch_delay(&self, mode: MockMode) -> Duration {
        Self::gated(self.fetch_period_ms, mode)
    }

    /// Delay for one of `steps` open progress steps in `mode`.
    pub fn open_step_delay(&self, mode: MockMode, steps: u32) -> Duration {
        Self::gated(self.open_delay_ms / u64::from(steps.max(1)), mode)
    }

    /// Delay for a plain command in `mode`.
    pub fn command_delay(&self, mode: MockMode) -> Duration {
        Self::gated(self.command_delay_ms, mode)
    }

    fn gated(ms: u64, mode: MockMode) -> Duration {
        if mode.simulates_timing() {
            Duration::from_millis(ms)
        } else {
            Duration::ZERO
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            fetch_period_ms: 0,
            open_delay_ms: 0,
            command_delay_ms: 0,
        }
    }
}

/// Sleep for `delay` unless it is zero.
pub(crate) fn pause(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing() {
        let config = TimingConfig::default();
        assert_eq!(config.fetch_period_ms, 0);
        assert_eq!(config.open_delay_ms, 0);
        assert_eq!(config.command_delay_ms, 0);
    }

    #[test]
    fn test_instant_mode_ignores_presets() {
        let config = TimingConfig::tracker();
        assert_eq!(config.fetch_delay(MockMode::Instant), Duration::ZERO);
        assert_eq!(config.open_step_delay(MockMode::Instant, 4), Duration::ZERO);
    }

    #[test]
    fn test_realistic_mode_uses_presets() {
        let config = TimingConfig::imager();
        assert_eq!(
            config.fetch_delay(MockMode::Realistic),
            Duration::from_millis(33)
        );
        assert_eq!(
            config.open_step_delay(MockMode::Realistic, 4),
            Duration::from_millis(25)
        );
        assert_eq!(
            config.command_delay(MockMode::Chaos),
            Duration::from_millis(5)
        );
    }
}
