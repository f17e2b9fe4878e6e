//! Device strategy interface.
//!
//! A [`DeviceStrategy`] is the device-specific half of a session: the handful
//! of primitives the generic engine calls to open the transport, activate
//! tools, run acquisition and fetch samples. The session owns all lifecycle
//! sequencing; a strategy only answers "did this primitive succeed".
//!
//! Strategies are shared between the foreground session and the acquisition
//! thread, so every primitive takes `&self` and implementations keep their
//! mutable device state behind their own locks.

use crate::error::{StrategyError, StrategyResult};
use crate::sample::RawSample;
use crate::tool::ToolInfo;
use bitflags::bitflags;
use std::collections::BTreeMap;
use std::sync::Arc;

bitflags! {
    /// Per-tool status flags reported with every sample.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ToolStatus: u8 {
        /// Device sees the tool this cycle.
        const PRESENT = 0b0000_0001;
        /// Tool port or handle is enabled.
        const ENABLED = 0b0000_0010;
        /// Tool definition is loaded in the device.
        const INITIALIZED = 0b0000_0100;
        /// All flags required for a tool to count as tracked.
        const READY = Self::PRESENT.bits() | Self::ENABLED.bits() | Self::INITIALIZED.bits();
    }
}

/// Latest news about one tool from the device.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolRecord {
    /// The device reported a sample and status flags.
    Reported {
        /// Raw sample.
        sample: RawSample,
        /// Status flags for this sample.
        status: ToolStatus,
    },
    /// The device explicitly reported the tool missing.
    Absent,
}

impl ToolRecord {
    /// Fully tracked report.
    pub fn tracked(sample: RawSample) -> Self {
        ToolRecord::Reported {
            sample,
            status: ToolStatus::READY,
        }
    }

    /// Whether the record counts as "tool visible".
    pub fn is_visible(&self) -> bool {
        match self {
            ToolRecord::Reported { status, .. } => status.contains(ToolStatus::READY),
            ToolRecord::Absent => false,
        }
    }
}

/// Records keyed by tool identifier, in identifier order.
pub type FetchBatch = BTreeMap<String, ToolRecord>;

/// Connection-setup progress, `0.0..=1.0`.
pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// Default upper bound on the update cadence.
pub const DEFAULT_MAX_FREQUENCY_HZ: f64 = 240.0;

/// Device-specific primitives consumed by [`crate::session::DeviceSession`].
pub trait DeviceStrategy: Send + Sync {
    /// Driver type tag. Tools configured for another driver type are refused.
    fn driver_type(&self) -> &str;

    /// Highest cadence the device supports.
    fn max_frequency(&self) -> f64 {
        DEFAULT_MAX_FREQUENCY_HZ
    }

    /// Establish communication with the device.
    fn open(&self) -> StrategyResult;

    /// Release the device.
    fn close(&self) -> StrategyResult;

    /// Bring the device back to its post-open state.
    fn reset(&self) -> StrategyResult;

    /// Load and enable the given tools on the device.
    fn activate_tools(&self, tools: &[ToolInfo]) -> StrategyResult;

    /// Disable every tool on the device.
    fn deactivate_tools(&self) -> StrategyResult;

    /// Put the device in acquisition mode.
    fn start_acquisition(&self) -> StrategyResult;

    /// Leave acquisition mode.
    fn stop_acquisition(&self) -> StrategyResult;

    /// Read one batch of samples from the device. May block on I/O.
    ///
    /// Runs on the acquisition thread in threaded mode. An empty batch means
    /// "no news" and is not an error.
    fn threaded_fetch(&self) -> StrategyResult<FetchBatch>;

    /// Post-process a drained batch before it is published.
    ///
    /// Fails only on an unrecoverable device-level error; a missing tool is
    /// not a failure.
    fn update(&self, _batch: &mut FetchBatch) -> StrategyResult {
        Ok(())
    }

    /// Check that a tool is compatible with this device.
    fn verify_tool_information(&self, tool: &ToolInfo) -> StrategyResult;

    /// Register a tool in the strategy's per-tool containers.
    fn add_tool_to_containers(&self, tool: &ToolInfo) -> StrategyResult;

    /// Remove a tool from the strategy's per-tool containers.
    fn remove_tool_from_containers(&self, tool_id: &str) -> StrategyResult;

    /// Check a requested cadence frequency.
    fn validate_frequency(&self, hz: f64) -> StrategyResult {
        let max = self.max_frequency();
        if !hz.is_finite() || hz <= 0.0 {
            return Err(StrategyError::configuration(format!(
                "frequency {hz} Hz must be positive"
            )));
        }
        if hz > max {
            return Err(StrategyError::configuration(format!(
                "frequency {hz} Hz exceeds device maximum {max} Hz"
            )));
        }
        Ok(())
    }

    /// Install a progress observer for slow connection setup.
    fn set_progress_callback(&self, _callback: Option<ProgressCallback>) {}
}

impl std::fmt::Debug for dyn DeviceStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceStrategy")
            .field("driver_type", &self.driver_type())
            .finish()
    }
}
