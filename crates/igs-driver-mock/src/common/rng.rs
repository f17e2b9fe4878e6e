//! Seeded randomness for simulated devices.
//!
//! Pose jitter and chaos-mode failures both draw from one [`SimRng`] per
//! strategy instance, so a fixed seed replays the same noise and the same
//! failure sequence on every run.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Shared, seedable random source.
pub struct SimRng {
    seed: Option<u64>,
    inner: Mutex<ChaCha8Rng>,
}

impl SimRng {
    /// Source seeded with `seed`, or from OS entropy when `None`.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = seed.map_or_else(ChaCha8Rng::from_entropy, ChaCha8Rng::seed_from_u64);
        Self {
            seed,
            inner: Mutex::new(rng),
        }
    }

    /// Seed this source was created with.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Bernoulli draw: `true` with probability `rate`, clamped to `0.0..=1.0`.
    pub fn chance(&self, rate: f64) -> bool {
        match rate {
            r if r <= 0.0 || r.is_nan() => false,
            r if r >= 1.0 => true,
            r => self.inner.lock().gen_bool(r),
        }
    }

    /// Symmetric noise in `[-amplitude, amplitude)`; zero for a non-positive
    /// amplitude.
    pub fn jitter(&self, amplitude: f64) -> f64 {
        if amplitude > 0.0 {
            self.inner.lock().gen_range(-amplitude..amplitude)
        } else {
            0.0
        }
    }

    /// Independent [`jitter`](Self::jitter) on each axis, drawn under one lock.
    pub fn jitter3(&self, amplitude: f64) -> [f64; 3] {
        if amplitude <= 0.0 {
            return [0.0; 3];
        }
        let mut rng = self.inner.lock();
        [
            rng.gen_range(-amplitude..amplitude),
            rng.gen_range(-amplitude..amplitude),
            rng.gen_range(-amplitude..amplitude),
        ]
    }
}

impl Default for SimRng {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for SimRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimRng").field("seed", &self.seed).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_noise() {
        let a = SimRng::new(Some(42));
        let b = SimRng::new(Some(42));
        for _ in 0..10 {
            assert_eq!(a.jitter3(1.0), b.jitter3(1.0));
        }
        assert_eq!(a.seed(), Some(42));
    }

    #[test]
    fn test_chance_extremes() {
        let rng = SimRng::new(Some(1));
        assert!((0..100).all(|_| !rng.chance(0.0)));
        assert!((0..100).all(|_| rng.chance(1.0)));
        assert!(!rng.chance(f64::NAN));
    }

    #[test]
    fn test_chance_rate() {
        let rng = SimRng::new(Some(42));
        let hits = (0..10_000).filter(|_| rng.chance(0.3)).count();
        assert!((2700..3300).contains(&hits), "got {hits} hits");
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let rng = SimRng::new(Some(7));
        for _ in 0..100 {
            assert!(rng.jitter3(0.5).iter().all(|v| (-0.5..0.5).contains(v)));
        }
        assert_eq!(rng.jitter(0.0), 0.0);
        assert_eq!(rng.jitter3(-1.0), [0.0; 3]);
    }
}
