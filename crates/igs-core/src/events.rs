//! Typed events and explicit callback registration.
//!
//! Every session and tool owns an [`EventBus`]. Observers register closures,
//! either for every event or for one event kind, and get back a
//! [`SubscriptionId`] to unsubscribe with. Events raised while a session or
//! tool lock is held are queued by the owner and dispatched only after the
//! lock has been released, so callbacks may freely call back into the
//! session.

use crate::sample::{Frame, Transform};
use crate::session::{SessionInput, SessionState};
use crate::tool::{ToolInput, ToolState};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Event types that can be filtered by kind.
pub trait EventKind {
    /// Variant name, e.g. `"OpenFailed"`.
    fn kind(&self) -> &'static str;
}

/// Events raised by a [`crate::session::DeviceSession`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Device connection established.
    Opened,
    /// Device connection could not be established.
    OpenFailed {
        /// Reason reported by the strategy.
        message: String,
    },
    /// Tool set activated and attached.
    Initialized,
    /// Tool activation failed.
    InitializeFailed {
        /// Reason reported by the session or strategy.
        message: String,
    },
    /// Acquisition running.
    Started,
    /// Acquisition could not be started.
    StartFailed {
        /// Reason reported by the strategy.
        message: String,
    },
    /// One update cycle completed.
    Updated,
    /// One update cycle failed. The session keeps streaming.
    UpdateFailed {
        /// Reason reported by the strategy.
        message: String,
    },
    /// No acquisition batch arrived within the update timeout.
    UpdateTimedOut {
        /// How long the update waited.
        waited: Duration,
    },
    /// Acquisition stopped.
    Stopped,
    /// Acquisition could not be stopped. The session keeps streaming.
    StopFailed {
        /// Reason reported by the strategy.
        message: String,
    },
    /// Device connection closed.
    Closed,
    /// Device refused to close cleanly.
    CloseFailed {
        /// Reason reported by the strategy.
        message: String,
    },
    /// Device reset completed.
    ResetCompleted,
    /// Device reset failed.
    ResetFailed {
        /// Reason reported by the strategy.
        message: String,
    },
    /// Cadence frequency changed.
    FrequencySet {
        /// New frequency.
        hz: f64,
        /// Recomputed sample validity.
        validity_ms: f64,
    },
    /// Cadence frequency rejected.
    FrequencyRejected {
        /// Requested frequency.
        hz: f64,
        /// Why it was rejected.
        message: String,
    },
    /// A tool was registered with the session.
    ToolAttached {
        /// Tool identifier.
        tool: String,
    },
    /// A tool could not be registered.
    ToolAttachFailed {
        /// Tool identifier.
        tool: String,
        /// Why registration failed.
        message: String,
    },
    /// A tool was removed from the session.
    ToolDetached {
        /// Tool identifier.
        tool: String,
    },
    /// A request arrived in a state that does not accept it.
    InvalidRequest {
        /// State at the time of the request.
        state: SessionState,
        /// Rejected input.
        input: SessionInput,
    },
}

impl EventKind for SessionEvent {
    fn kind(&self) -> &'static str {
        match self {
            SessionEvent::Opened => "Opened",
            SessionEvent::OpenFailed { .. } => "OpenFailed",
            SessionEvent::Initialized => "Initialized",
            SessionEvent::InitializeFailed { .. } => "InitializeFailed",
            SessionEvent::Started => "Started",
            SessionEvent::StartFailed { .. } => "StartFailed",
            SessionEvent::Updated => "Updated",
            SessionEvent::UpdateFailed { .. } => "UpdateFailed",
            SessionEvent::UpdateTimedOut { .. } => "UpdateTimedOut",
            SessionEvent::Stopped => "Stopped",
            SessionEvent::StopFailed { .. } => "StopFailed",
            SessionEvent::Closed => "Closed",
            SessionEvent::CloseFailed { .. } => "CloseFailed",
            SessionEvent::ResetCompleted => "ResetCompleted",
            SessionEvent::ResetFailed { .. } => "ResetFailed",
            SessionEvent::FrequencySet { .. } => "FrequencySet",
            SessionEvent::FrequencyRejected { .. } => "FrequencyRejected",
            SessionEvent::ToolAttached { .. } => "ToolAttached",
            SessionEvent::ToolAttachFailed { .. } => "ToolAttachFailed",
            SessionEvent::ToolDetached { .. } => "ToolDetached",
            SessionEvent::InvalidRequest { .. } => "InvalidRequest",
        }
    }
}

/// Events raised by a [`crate::tool::Tool`].
#[derive(Debug, Clone, PartialEq)]
pub enum ToolEvent {
    /// Configuration accepted and identifier assigned.
    Configured {
        /// Assigned identifier.
        tool: String,
    },
    /// Configuration rejected. The tool stays idle.
    ConfigurationFailed {
        /// Why configuration was rejected.
        reason: String,
    },
    /// Tool registered with a session.
    Attached {
        /// Tool identifier.
        tool: String,
    },
    /// Session refused the tool.
    AttachmentFailed {
        /// Tool identifier.
        tool: String,
        /// Why the session refused it.
        message: String,
    },
    /// Tool removed from its session.
    Detached {
        /// Tool identifier.
        tool: String,
    },
    /// Removal failed.
    DetachmentFailed {
        /// Tool identifier.
        tool: String,
        /// Why removal failed.
        message: String,
    },
    /// Owning session started streaming.
    StreamingStarted {
        /// Tool identifier.
        tool: String,
    },
    /// Owning session stopped streaming.
    StreamingStopped {
        /// Tool identifier.
        tool: String,
    },
    /// Tool became visible to the device.
    MadeTransitionToTracked {
        /// Tool identifier.
        tool: String,
    },
    /// Tool is no longer visible to the device.
    NotAvailable {
        /// Tool identifier.
        tool: String,
    },
    /// A new composed transform was published.
    TransformModified {
        /// Tool identifier.
        tool: String,
        /// Published transform.
        transform: Transform,
    },
    /// A new frame was published.
    FrameModified {
        /// Tool identifier.
        tool: String,
        /// Published frame.
        frame: Frame,
    },
    /// A request arrived in a state that does not accept it.
    InvalidRequest {
        /// Tool identifier, empty before configuration.
        tool: String,
        /// State at the time of the request.
        state: ToolState,
        /// Rejected input.
        input: ToolInput,
    },
}

impl EventKind for ToolEvent {
    fn kind(&self) -> &'static str {
        match self {
            ToolEvent::Configured { .. } => "Configured",
            ToolEvent::ConfigurationFailed { .. } => "ConfigurationFailed",
            ToolEvent::Attached { .. } => "Attached",
            ToolEvent::AttachmentFailed { .. } => "AttachmentFailed",
            ToolEvent::Detached { .. } => "Detached",
            ToolEvent::DetachmentFailed { .. } => "DetachmentFailed",
            ToolEvent::StreamingStarted { .. } => "StreamingStarted",
            ToolEvent::StreamingStopped { .. } => "StreamingStopped",
            ToolEvent::MadeTransitionToTracked { .. } => "MadeTransitionToTracked",
            ToolEvent::NotAvailable { .. } => "NotAvailable",
            ToolEvent::TransformModified { .. } => "TransformModified",
            ToolEvent::FrameModified { .. } => "FrameModified",
            ToolEvent::InvalidRequest { .. } => "InvalidRequest",
        }
    }
}

/// Terminal outcome of a blocking request.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The request reached its success state.
    Completed,
    /// The request ran and failed.
    Failed(String),
    /// The request was not legal in the current state and did nothing.
    Rejected {
        /// State name at the time of the request.
        state: &'static str,
        /// Rejected input name.
        input: &'static str,
    },
}

impl RequestOutcome {
    /// Whether the request completed successfully.
    pub fn is_completed(&self) -> bool {
        matches!(self, RequestOutcome::Completed)
    }

    /// Whether the request was rejected as invalid.
    pub fn is_rejected(&self) -> bool {
        matches!(self, RequestOutcome::Rejected { .. })
    }

    /// Collapse into a `Result` with a human-readable failure message.
    pub fn into_result(self) -> Result<(), String> {
        match self {
            RequestOutcome::Completed => Ok(()),
            RequestOutcome::Failed(message) => Err(message),
            RequestOutcome::Rejected { state, input } => {
                Err(format!("request {input} is not valid in state {state}"))
            }
        }
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Subscriber<E> {
    id: u64,
    kind: Option<&'static str>,
    callback: Callback<E>,
}

/// List of observer callbacks for one event type.
pub struct EventBus<E> {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<Subscriber<E>>>,
}

impl<E: EventKind> EventBus<E> {
    /// Empty bus.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Observe every event.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.insert(None, Arc::new(callback))
    }

    /// Observe events whose [`EventKind::kind`] equals `kind`.
    pub fn subscribe_kind<F>(&self, kind: &'static str, callback: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.insert(Some(kind), Arc::new(callback))
    }

    /// Remove an observer. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id.0);
        subscribers.len() != before
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Whether no observer is registered.
    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }

    /// Invoke every matching observer.
    ///
    /// The observer list is snapshotted first, so callbacks may subscribe or
    /// unsubscribe without deadlocking.
    pub fn emit(&self, event: &E) {
        let kind = event.kind();
        let targets: Vec<Callback<E>> = self
            .subscribers
            .read()
            .iter()
            .filter(|s| s.kind.map_or(true, |k| k == kind))
            .map(|s| Arc::clone(&s.callback))
            .collect();
        for callback in targets {
            callback(event);
        }
    }

    fn insert(&self, kind: Option<&'static str>, callback: Callback<E>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().push(Subscriber { id, kind, callback });
        SubscriptionId(id)
    }
}

impl<E: EventKind> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscribers.read().len())
            .finish()
    }
}
