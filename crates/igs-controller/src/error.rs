//! Error types for the session controller.

use igs_core::{RequestOutcome, ToolConfigError};
use thiserror::Error;

/// Result alias for controller operations.
pub type ControllerResult<T = ()> = std::result::Result<T, ControllerError>;

/// Failures reported by [`crate::SessionController`] and
/// [`crate::StrategyRegistry`].
#[derive(Error, Debug)]
pub enum ControllerError {
    /// Configuration could not be loaded or is inconsistent.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No factory is registered for the configured driver.
    #[error("no strategy factory registered for driver '{driver}' (available: {available:?})")]
    UnknownDriver {
        /// Requested driver type.
        driver: String,
        /// Driver types that are registered.
        available: Vec<String>,
    },

    /// The factory rejected the driver settings or failed to build.
    #[error("driver '{driver}': {message}")]
    Strategy {
        /// Driver type.
        driver: String,
        /// Factory error, with its context chain.
        message: String,
    },

    /// A tool descriptor was rejected at configure time.
    #[error("tool '{tool}' rejected: {source}")]
    Tool {
        /// Identifier or configured name of the tool.
        tool: String,
        /// Validation failure.
        #[source]
        source: ToolConfigError,
    },

    /// A session request ran and failed.
    #[error("{operation} failed: {message}")]
    Request {
        /// Request name.
        operation: &'static str,
        /// Failure message carried by the session event.
        message: String,
    },

    /// A session request was not legal in the current state.
    #[error("{operation} is not valid while the session is {state}")]
    Rejected {
        /// Request name.
        operation: &'static str,
        /// Session state at the time of the request.
        state: &'static str,
    },

    /// No session has been initialized.
    #[error("no device session; initialize the controller first")]
    NotInitialized,

    /// A session is already running under this controller.
    #[error("a device session is already initialized")]
    AlreadyInitialized,

    /// A controller thread could not be spawned.
    #[error("failed to spawn {thread} thread: {source}")]
    Spawn {
        /// Thread role.
        thread: &'static str,
        /// OS error.
        #[source]
        source: std::io::Error,
    },
}

impl ControllerError {
    /// Translate a blocking request's outcome.
    pub fn check(operation: &'static str, outcome: RequestOutcome) -> ControllerResult {
        match outcome {
            RequestOutcome::Completed => Ok(()),
            RequestOutcome::Failed(message) => Err(ControllerError::Request { operation, message }),
            RequestOutcome::Rejected { state, .. } => {
                Err(ControllerError::Rejected { operation, state })
            }
        }
    }
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Figment could not read or deserialize a source.
    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),

    /// Values are present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_translation() {
        assert!(ControllerError::check("start", RequestOutcome::Completed).is_ok());

        let err = ControllerError::check("open", RequestOutcome::Failed("no cable".into()))
            .unwrap_err();
        assert_eq!(err.to_string(), "open failed: no cable");

        let err = ControllerError::check(
            "start",
            RequestOutcome::Rejected {
                state: "Idle",
                input: "Start",
            },
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ControllerError::Rejected {
                operation: "start",
                state: "Idle"
            }
        ));
    }

    #[test]
    fn test_tool_error_keeps_source() {
        let err = ControllerError::Tool {
            tool: "probe".into(),
            source: ToolConfigError::PortOutOfRange { port: 13, max: 12 },
        };
        assert_eq!(
            err.to_string(),
            "tool 'probe' rejected: port 13 is out of range (1..=12)"
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}
