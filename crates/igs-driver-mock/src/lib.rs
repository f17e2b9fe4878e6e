//! Simulated devices for the igs session engine
//!
//! This crate provides device strategies for running and testing sessions
//! without physical hardware. All strategies are plain threads-and-locks code:
//! delays use `std::thread::sleep` and only happen in `Realistic` and `Chaos`
//! modes.
//!
//! # Available Strategies
//!
//! - [`SimulatedTracker`] - Optical tracker with orbiting tools, periodic
//!   occlusion, position jitter and a switchable transport name
//! - [`SimulatedImager`] - Frame grabber delivering test-pattern frames to a
//!   single video tool
//! - [`ScriptedStrategy`] - Replays prepared fetch batches and records every
//!   primitive call; used by the session tests
//!
//! # Performance Characteristics
//!
//! - SimulatedTracker: 16ms per fetch (~60Hz), 200ms open handshake
//! - SimulatedImager: 33ms per frame (~30fps), 100ms open
//!
//! # Strategy Factory Pattern
//!
//! The simulated devices provide a `StrategyFactory` implementation for use
//! with the controller registry:
//!
//! ```rust,ignore
//! use igs_driver_mock::{SimulatedImagerFactory, SimulatedTrackerFactory};
//! use igs_controller::StrategyRegistry;
//!
//! let registry = StrategyRegistry::new();
//! registry.register_factory(Box::new(SimulatedTrackerFactory));
//! registry.register_factory(Box::new(SimulatedImagerFactory));
//! ```

pub mod common;
mod pattern;
pub mod scripted;
mod sim_imager;
mod sim_tracker;

pub use common::{ErrorCodeTable, Fault, FaultInjector, MockMode, SimRng, TimingConfig};
pub use scripted::ScriptedStrategy;
pub use sim_imager::{
    SimulatedImager, SimulatedImagerConfig, SimulatedImagerFactory, SIM_IMAGER_DRIVER,
};
pub use sim_tracker::{
    SimulatedTracker, SimulatedTrackerConfig, SimulatedTrackerFactory, SIM_TRACKER_DRIVER,
};

// Re-export for convenience
pub use pattern::generate_test_pattern;

/// Register every simulated strategy factory with a registry.
///
/// # Example
///
/// ```rust,ignore
/// use igs_driver_mock::register_all;
/// use igs_controller::StrategyRegistry;
///
/// let registry = StrategyRegistry::new();
/// register_all(&registry);
/// ```
pub fn register_all(registry: &impl FactoryRegistry) {
    registry.register_factory(Box::new(SimulatedTrackerFactory));
    registry.register_factory(Box::new(SimulatedImagerFactory));
}

/// Trait for registries that can accept strategy factories.
///
/// This allows the mock crate to work with any registry implementation
/// without depending on the controller crate.
pub trait FactoryRegistry {
    /// Register a strategy factory.
    fn register_factory(&self, factory: Box<dyn igs_core::StrategyFactory>);
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<&'static str>>);

    impl FactoryRegistry for Collect {
        fn register_factory(&self, factory: Box<dyn igs_core::StrategyFactory>) {
            self.0.lock().push(factory.driver_type());
        }
    }

    #[test]
    fn test_register_all_registers_every_device() {
        let registry = Collect::default();
        register_all(&registry);
        assert_eq!(
            *registry.0.lock(),
            vec![SIM_TRACKER_DRIVER, SIM_IMAGER_DRIVER]
        );
    }
}
