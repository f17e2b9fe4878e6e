//! Error types shared by the session engine and device strategies.
//!
//! Expected device failures never cross the strategy boundary as panics.
//! A strategy primitive returns a [`StrategyError`], the session turns it
//! into a `Failure` input for its state machine, and the failure surfaces
//! to observers as a typed event carrying the human-readable message.
//!
//! ## Error Categories
//!
//! - **Configuration**: tool or device configuration rejected before any
//!   hardware was touched. Always recoverable by fixing the configuration.
//! - **Communication / Timeout**: the device could not be reached or stopped
//!   answering. The caller may retry indefinitely.
//! - **Hardware**: the device reported a fault.
//! - **InvalidState**: a request arrived in a state that cannot serve it.

use thiserror::Error;

/// Convenience alias for strategy primitive results.
pub type StrategyResult<T = ()> = std::result::Result<T, StrategyError>;

/// Classification of a strategy failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyErrorKind {
    /// Device or tool configuration is invalid.
    Configuration,
    /// Transport could not be opened or a transfer failed.
    Communication,
    /// Device did not answer in time.
    Timeout,
    /// Device reported a hardware fault.
    Hardware,
    /// A tool descriptor does not match this device.
    IncompatibleTool,
    /// The operation is not legal in the current state.
    InvalidState,
    /// Anything else.
    Unknown,
}

impl std::fmt::Display for StrategyErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            StrategyErrorKind::Configuration => "configuration",
            StrategyErrorKind::Communication => "communication",
            StrategyErrorKind::Timeout => "timeout",
            StrategyErrorKind::Hardware => "hardware",
            StrategyErrorKind::IncompatibleTool => "incompatible_tool",
            StrategyErrorKind::InvalidState => "invalid_state",
            StrategyErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// Failure reported by a device strategy primitive.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct StrategyError {
    /// Failure category.
    pub kind: StrategyErrorKind,
    /// Human-readable reason, forwarded verbatim into failure events.
    pub message: String,
}

impl StrategyError {
    /// Create an error of the given kind.
    pub fn new(kind: StrategyErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for [`StrategyErrorKind::Configuration`].
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(StrategyErrorKind::Configuration, message)
    }

    /// Shorthand for [`StrategyErrorKind::Communication`].
    pub fn communication(message: impl Into<String>) -> Self {
        Self::new(StrategyErrorKind::Communication, message)
    }

    /// Shorthand for [`StrategyErrorKind::Hardware`].
    pub fn hardware(message: impl Into<String>) -> Self {
        Self::new(StrategyErrorKind::Hardware, message)
    }

    /// Shorthand for [`StrategyErrorKind::Timeout`].
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(StrategyErrorKind::Timeout, message)
    }

    /// Shorthand for [`StrategyErrorKind::IncompatibleTool`].
    pub fn incompatible_tool(message: impl Into<String>) -> Self {
        Self::new(StrategyErrorKind::IncompatibleTool, message)
    }

    /// Whether retrying the same primitive later can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            StrategyErrorKind::Communication | StrategyErrorKind::Timeout
        )
    }
}

/// Reasons a tool configuration is rejected.
///
/// Raised synchronously by [`crate::tool::Tool::request_configure`]; no
/// hardware is involved and the tool stays in its idle state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolConfigError {
    /// The derived identifier is empty.
    #[error("tool identifier must not be empty")]
    EmptyIdentifier,

    /// Port number outside the supported range.
    #[error("port {port} is out of range (1..={max})")]
    PortOutOfRange {
        /// Requested port.
        port: u32,
        /// Highest valid port.
        max: u32,
    },

    /// Channel number outside the supported range.
    #[error("channel {channel} is out of range (0..{max})")]
    ChannelOutOfRange {
        /// Requested channel.
        channel: u32,
        /// Number of channels per port.
        max: u32,
    },

    /// Tool definition file is missing or unusable.
    #[error("tool definition file '{path}' is not usable: {reason}")]
    DefinitionFile {
        /// File that was checked.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Imager geometry is degenerate.
    #[error("video tool '{name}' has invalid geometry {width}x{height}x{channels}")]
    InvalidGeometry {
        /// Tool name.
        name: String,
        /// Frame width.
        width: u32,
        /// Frame height.
        height: u32,
        /// Channels per pixel.
        channels: u32,
    },

    /// Configure was requested in a state that does not accept it.
    #[error("tool cannot be configured while {state}")]
    InvalidState {
        /// State name at the time of the request.
        state: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_error_display_includes_kind() {
        let err = StrategyError::communication("port COM9 does not exist");
        assert_eq!(
            err.to_string(),
            "communication error: port COM9 does not exist"
        );
    }

    #[test]
    fn transient_kinds() {
        assert!(StrategyError::timeout("no reply").is_transient());
        assert!(StrategyError::communication("lost").is_transient());
        assert!(!StrategyError::hardware("fault 0x42").is_transient());
        assert!(!StrategyError::configuration("bad").is_transient());
    }

    #[test]
    fn tool_config_error_messages() {
        let err = ToolConfigError::PortOutOfRange { port: 13, max: 12 };
        assert_eq!(err.to_string(), "port 13 is out of range (1..=12)");
    }
}
