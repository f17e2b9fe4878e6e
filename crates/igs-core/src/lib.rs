//! Core session engine for image-guided-surgery tracking and imaging devices.
//!
//! This crate brings a position tracker or frame grabber from disconnected to
//! streaming and maps per-tool samples and visibility onto tools. Concrete
//! device backends plug in through the [`DeviceStrategy`] trait; everything
//! else (lifecycle sequencing, the acquisition thread, the update cadence,
//! transform composition and tool bookkeeping) lives here.
//!
//! # Modules
//!
//! - [`session`] - [`DeviceSession`], the per-device lifecycle state machine
//! - [`tool`] - [`Tool`], independently configured endpoints attached to a session
//! - [`strategy`] - [`DeviceStrategy`], the device-specific primitives
//! - [`factory`] - [`StrategyFactory`], config-driven strategy construction
//! - [`bridge`] - [`AcquisitionBridge`], the producer/consumer sample buffer
//! - [`cadence`] - [`CadenceGenerator`], the fixed-frequency update ticker
//! - [`sample`] - [`Transform`], [`Frame`] and [`RawSample`] with validity windows
//! - [`state_machine`] - the generic table-driven machine both lifecycles use
//! - [`events`] - typed events and callback registration
//! - [`clock`] - injectable time sources
//! - [`error`] - strategy and configuration errors
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──Open──► Connected ──Initialize──► ToolsActive ──Start──► Streaming
//!   ▲                │  ▲                       │  ▲                │
//!   └────Close───────┘  └────────Reset──────────┘  └──────Stop──────┘
//! ```

pub mod bridge;
pub mod cadence;
pub mod clock;
pub mod error;
pub mod events;
pub mod factory;
pub mod sample;
pub mod session;
pub mod state_machine;
pub mod strategy;
pub mod tool;

pub use bridge::{AcquisitionBridge, AcquisitionStats};
pub use cadence::CadenceGenerator;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{StrategyError, StrategyErrorKind, StrategyResult, ToolConfigError};
pub use events::{EventBus, EventKind, RequestOutcome, SessionEvent, SubscriptionId, ToolEvent};
pub use factory::StrategyFactory;
pub use sample::{compose_tool_transform, Frame, RawSample, TimeStamp, Transform};
pub use session::{DeviceSession, SessionInput, SessionOptions, SessionState};
pub use strategy::{DeviceStrategy, FetchBatch, ProgressCallback, ToolRecord, ToolStatus};
pub use tool::{Tool, ToolDescriptor, ToolHandle, ToolInfo, ToolSpec, ToolState};
