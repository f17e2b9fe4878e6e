//! Time sources for sample validity.
//!
//! Sample validity windows are expressed in milliseconds as `f64`, so a
//! clock only has to answer "what time is it now". Sessions hold an
//! `Arc<dyn Clock>`; tests inject a [`ManualClock`] to make expiration
//! deterministic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Source of the current time in milliseconds.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds.
    fn now_ms(&self) -> f64;
}

/// Wall clock backed by `chrono::Utc`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        chrono::Utc::now().timestamp_micros() as f64 / 1000.0
    }
}

/// Manually advanced clock with microsecond resolution.
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    /// Create a clock reading `start_ms`.
    pub fn new(start_ms: f64) -> Self {
        let clock = Self::default();
        clock.set_ms(start_ms);
        clock
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.micros
            .fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }

    /// Jump to an absolute time. Negative values clamp to zero.
    pub fn set_ms(&self, ms: f64) {
        let micros = (ms.max(0.0) * 1000.0).round() as u64;
        self.micros.store(micros, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        self.micros.load(Ordering::SeqCst) as f64 / 1000.0
    }
}
