//! Common infrastructure for simulated devices.
//!
//! Provides reusable components for building simulated strategies:
//!
//! - **mode**: Operational modes (Instant, Realistic, Chaos)
//! - **timing**: Device-like timing configurations
//! - **errors**: Fault injection and per-instance fault code tables
//! - **rng**: Seeded noise and failure draws

pub mod errors;
pub mod mode;
pub mod rng;
pub mod timing;

// Re-export commonly used types
pub use errors::{ErrorCodeTable, Fault, FaultInjector};
pub use mode::MockMode;
pub use rng::SimRng;
pub use timing::TimingConfig;
