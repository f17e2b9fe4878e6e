//! Tools: independently configured endpoints attached to one session.
//!
//! A [`Tool`] is shared as a [`ToolHandle`] (`Arc<Tool>`) between the
//! application and the session it is attached to. Its state lives behind a
//! single mutex. The session locks a tool only while already holding its own
//! core lock, and a tool never holds its lock while calling into the
//! session, so the lock order is always session then tool.

mod descriptor;
mod machine;

pub use descriptor::{ToolDescriptor, ToolInfo, ToolSpec, CHANNELS_PER_PORT, MAX_PORT};
pub use machine::{ToolInput, ToolState};

use crate::error::ToolConfigError;
use crate::events::{EventBus, RequestOutcome, SubscriptionId, ToolEvent};
use crate::sample::{Frame, RawSample, Transform};
use crate::session::{DeviceSession, SessionShared};
use crate::state_machine::{StateMachine, Symbol};
use machine::ToolAction;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Shared handle to a tool.
pub type ToolHandle = Arc<Tool>;

/// What an update cycle publishes for a tool that was reported present.
#[derive(Debug, Clone)]
pub(crate) enum Publication {
    /// Composed transform.
    Transform(Transform),
    /// Restamped frame.
    Frame(Frame),
    /// Raw sample stored but nothing published this cycle.
    Withheld,
}

struct ToolInner {
    machine: StateMachine<ToolState, ToolInput, ToolAction>,
    descriptor: ToolDescriptor,
    id: Option<String>,
    raw: Option<RawSample>,
    transform: Option<Transform>,
    frame: Option<Frame>,
    updated: bool,
    session: Weak<SessionShared>,
    failure: Option<String>,
    config_error: Option<ToolConfigError>,
}

impl ToolInner {
    fn label(&self) -> String {
        self.id.clone().unwrap_or_default()
    }

    /// Feed `input` and run every resulting action except the ones that
    /// need the session, which are returned to the caller.
    fn run(&mut self, input: ToolInput, events: &mut Vec<ToolEvent>) -> Option<ToolAction> {
        self.machine.push_input(input);
        let mut deferred = None;
        while let Some(step) = self.machine.process_next() {
            let tool = self.label();
            match step.action {
                ToolAction::Validate => match self.descriptor.validate() {
                    Ok(id) => {
                        self.id = Some(id);
                        self.config_error = None;
                        self.machine.push_input(ToolInput::Success);
                    }
                    Err(err) => {
                        self.config_error = Some(err);
                        self.machine.push_input(ToolInput::Failure);
                    }
                },
                ToolAction::ReportConfigured => {
                    debug!(tool = %tool, "Tool configured");
                    events.push(ToolEvent::Configured { tool });
                }
                ToolAction::ReportConfigurationFailed => {
                    let reason = self
                        .config_error
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_default();
                    warn!(reason = %reason, "Tool configuration rejected");
                    events.push(ToolEvent::ConfigurationFailed { reason });
                }
                ToolAction::RequestAttach | ToolAction::RequestDetach => {
                    deferred = Some(step.action);
                }
                ToolAction::ReportAttached => {
                    debug!(tool = %tool, "Tool attached");
                    events.push(ToolEvent::Attached { tool });
                }
                ToolAction::ReportAttachmentFailed => {
                    let message = self.failure.take().unwrap_or_default();
                    warn!(tool = %tool, error = %message, "Tool attachment failed");
                    events.push(ToolEvent::AttachmentFailed { tool, message });
                }
                ToolAction::ReportDetached => {
                    self.session = Weak::new();
                    self.raw = None;
                    self.updated = false;
                    debug!(tool = %tool, "Tool detached");
                    events.push(ToolEvent::Detached { tool });
                }
                ToolAction::ReportDetachmentFailed => {
                    let message = self.failure.take().unwrap_or_default();
                    warn!(tool = %tool, error = %message, "Tool detachment failed");
                    events.push(ToolEvent::DetachmentFailed { tool, message });
                }
                ToolAction::ReportStreamingStarted => {
                    events.push(ToolEvent::StreamingStarted { tool });
                }
                ToolAction::ReportStreamingStopped => {
                    events.push(ToolEvent::StreamingStopped { tool });
                }
                ToolAction::ReportTracked => {
                    debug!(tool = %tool, "Tool tracked");
                    events.push(ToolEvent::MadeTransitionToTracked { tool });
                }
                ToolAction::ReportNotAvailable => {
                    debug!(tool = %tool, "Tool not available");
                    events.push(ToolEvent::NotAvailable { tool });
                }
                ToolAction::Nothing => {}
                ToolAction::ReportInvalidRequest => {
                    warn!(
                        tool = %tool,
                        state = step.from.name(),
                        input = step.input.name(),
                        "Invalid tool request"
                    );
                    events.push(ToolEvent::InvalidRequest {
                        tool,
                        state: step.from,
                        input: step.input,
                    });
                }
            }
        }
        deferred
    }
}

/// A tracked rigid body or imaging source.
pub struct Tool {
    inner: Mutex<ToolInner>,
    events: EventBus<ToolEvent>,
}

impl Tool {
    /// Unconfigured tool for `descriptor`.
    pub fn new(descriptor: ToolDescriptor) -> ToolHandle {
        Arc::new(Self {
            inner: Mutex::new(ToolInner {
                machine: machine::build(),
                descriptor,
                id: None,
                raw: None,
                transform: None,
                frame: None,
                updated: false,
                session: Weak::new(),
                failure: None,
                config_error: None,
            }),
            events: EventBus::new(),
        })
    }

    /// Validate the descriptor and assign the identifier.
    ///
    /// Runs synchronously without touching hardware. On failure the tool
    /// stays idle and a `ConfigurationFailed` event carries the reason.
    pub fn request_configure(&self) -> Result<String, ToolConfigError> {
        let mut events = Vec::new();
        let result = {
            let mut inner = self.inner.lock();
            let before = inner.machine.state();
            inner.run(ToolInput::Configure, &mut events);
            if before != ToolState::Idle {
                Err(ToolConfigError::InvalidState {
                    state: before.name().to_string(),
                })
            } else if let Some(err) = inner.config_error.clone() {
                Err(err)
            } else {
                Ok(inner.id.clone().unwrap_or_default())
            }
        };
        self.dispatch(events);
        result
    }

    /// Attach to `session`. Legal only when configured.
    pub fn request_attach(self: &Arc<Self>, session: &DeviceSession) -> RequestOutcome {
        let mut events = Vec::new();
        let (deferred, state) = {
            let mut inner = self.inner.lock();
            let state = inner.machine.state();
            (inner.run(ToolInput::AttachToSession, &mut events), state)
        };

        let outcome = match deferred {
            Some(ToolAction::RequestAttach) => {
                let result = SessionShared::register_tool(session.shared(), self);
                let mut inner = self.inner.lock();
                match result {
                    Ok(()) => {
                        inner.run(ToolInput::Success, &mut events);
                        RequestOutcome::Completed
                    }
                    Err(message) => {
                        inner.failure = Some(message.clone());
                        inner.run(ToolInput::Failure, &mut events);
                        RequestOutcome::Failed(message)
                    }
                }
            }
            _ => RequestOutcome::Rejected {
                state: state.name(),
                input: ToolInput::AttachToSession.name(),
            },
        };
        self.dispatch(events);
        outcome
    }

    /// Detach from the owning session.
    pub fn request_detach(self: &Arc<Self>) -> RequestOutcome {
        let mut events = Vec::new();
        let (deferred, state, session, id) = {
            let mut inner = self.inner.lock();
            let state = inner.machine.state();
            let deferred = inner.run(ToolInput::Detach, &mut events);
            (deferred, state, inner.session.upgrade(), inner.label())
        };

        let outcome = match deferred {
            Some(ToolAction::RequestDetach) => {
                let result = match session {
                    Some(session) => session.unregister_tool(&id),
                    None => Ok(()),
                };
                let mut inner = self.inner.lock();
                match result {
                    Ok(()) => {
                        inner.run(ToolInput::Success, &mut events);
                        RequestOutcome::Completed
                    }
                    Err(message) => {
                        inner.failure = Some(message.clone());
                        inner.run(ToolInput::Failure, &mut events);
                        RequestOutcome::Failed(message)
                    }
                }
            }
            _ => RequestOutcome::Rejected {
                state: state.name(),
                input: ToolInput::Detach.name(),
            },
        };
        self.dispatch(events);
        outcome
    }

    /// Identifier, once configured.
    pub fn id(&self) -> Option<String> {
        self.inner.lock().id.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ToolState {
        self.inner.lock().machine.state()
    }

    /// Copy of the descriptor.
    pub fn descriptor(&self) -> ToolDescriptor {
        self.inner.lock().descriptor.clone()
    }

    /// Identifier plus descriptor, once configured.
    pub fn info(&self) -> Option<ToolInfo> {
        let inner = self.inner.lock();
        inner.id.clone().map(|id| ToolInfo {
            id,
            descriptor: inner.descriptor.clone(),
        })
    }

    /// Calibration transform applied after the raw sample.
    pub fn calibration(&self) -> Transform {
        self.inner.lock().descriptor.calibration
    }

    /// Replace the calibration transform. Takes effect on the next cycle.
    pub fn set_calibration(&self, calibration: Transform) {
        self.inner.lock().descriptor.calibration = calibration;
    }

    /// Latest raw sample from the device.
    pub fn raw_sample(&self) -> Option<RawSample> {
        self.inner.lock().raw.clone()
    }

    /// Latest published (composed) transform.
    pub fn transform(&self) -> Option<Transform> {
        self.inner.lock().transform
    }

    /// Latest published frame.
    pub fn frame(&self) -> Option<Frame> {
        self.inner.lock().frame.clone()
    }

    /// Whether the most recent update cycle carried news for this tool.
    pub fn is_updated(&self) -> bool {
        self.inner.lock().updated
    }

    /// Whether the device currently sees the tool.
    pub fn is_tracked(&self) -> bool {
        self.state() == ToolState::Tracked
    }

    /// Whether the tool belongs to a session.
    pub fn is_attached(&self) -> bool {
        matches!(
            self.state(),
            ToolState::Attached | ToolState::NotAvailable | ToolState::Tracked
        )
    }

    /// Tool event observers.
    pub fn events(&self) -> &EventBus<ToolEvent> {
        &self.events
    }

    /// Observe every tool event.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ToolEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(callback)
    }

    /// Graphviz rendering of the tool state machine.
    pub fn state_machine_dot(include_invalid: bool) -> String {
        machine::build().export_dot(include_invalid)
    }

    pub(crate) fn dispatch(&self, events: Vec<ToolEvent>) {
        for event in &events {
            self.events.emit(event);
        }
    }

    pub(crate) fn bind_session(&self, session: Weak<SessionShared>) {
        self.inner.lock().session = session;
    }

    pub(crate) fn begin_update(&self) {
        self.inner.lock().updated = false;
    }

    pub(crate) fn streaming_started(&self, events: &mut Vec<ToolEvent>) {
        self.inner.lock().run(ToolInput::StreamingStarted, events);
    }

    pub(crate) fn streaming_stopped(&self, events: &mut Vec<ToolEvent>) {
        self.inner.lock().run(ToolInput::StreamingStopped, events);
    }

    pub(crate) fn mark_not_available(&self, events: &mut Vec<ToolEvent>) {
        self.inner.lock().run(ToolInput::NotAvailable, events);
    }

    /// Store a present tool's raw sample and publish what the session
    /// composed for it.
    pub(crate) fn record_sample(
        &self,
        raw: RawSample,
        publication: Publication,
        events: &mut Vec<ToolEvent>,
    ) {
        let mut inner = self.inner.lock();
        inner.raw = Some(raw);
        inner.updated = true;
        inner.run(ToolInput::Tracked, events);
        let tool = inner.label();
        match publication {
            Publication::Transform(transform) => {
                inner.transform = Some(transform);
                events.push(ToolEvent::TransformModified { tool, transform });
            }
            Publication::Frame(frame) => {
                inner.frame = Some(frame.clone());
                events.push(ToolEvent::FrameModified { tool, frame });
            }
            Publication::Withheld => {}
        }
    }

    /// Move to `Configured` after the session already dropped the tool.
    pub(crate) fn detached_by_session(&self, events: &mut Vec<ToolEvent>) {
        let mut inner = self.inner.lock();
        if inner.run(ToolInput::Detach, events) == Some(ToolAction::RequestDetach) {
            inner.run(ToolInput::Success, events);
        }
    }

    /// Return to `Configured` after a failed activation, as if never
    /// attached.
    pub(crate) fn activation_failed(&self, message: &str, events: &mut Vec<ToolEvent>) {
        let mut inner = self.inner.lock();
        inner.failure = Some(message.to_string());
        inner.run(ToolInput::Failure, events);
    }

    /// Enter `Attaching` on behalf of a session staging this tool.
    ///
    /// Returns `false` (and queues an invalid-request event) if the tool is
    /// not configured.
    pub(crate) fn begin_staged_attach(&self, events: &mut Vec<ToolEvent>) -> bool {
        let mut inner = self.inner.lock();
        inner.run(ToolInput::AttachToSession, events) == Some(ToolAction::RequestAttach)
    }

    /// Complete a staged attach.
    pub(crate) fn staged_attach_succeeded(
        &self,
        session: Weak<SessionShared>,
        events: &mut Vec<ToolEvent>,
    ) {
        let mut inner = self.inner.lock();
        inner.session = session;
        inner.run(ToolInput::Success, events);
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Tool")
            .field("id", &inner.id)
            .field("state", &inner.machine.state().name())
            .field("driver_type", &inner.descriptor.driver_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::TimeStamp;
    use tracing_test::traced_test;

    fn probe() -> ToolHandle {
        Tool::new(
            ToolDescriptor::new("sim", ToolSpec::Port {
                port: 1,
                channel: None,
            })
            .with_name("probe"),
        )
    }

    fn kinds(events: &[ToolEvent]) -> Vec<&'static str> {
        use crate::events::EventKind;
        events.iter().map(EventKind::kind).collect()
    }

    #[test]
    fn configure_assigns_identifier() {
        let tool = probe();
        assert_eq!(tool.request_configure().unwrap(), "probe");
        assert_eq!(tool.state(), ToolState::Configured);
        assert_eq!(tool.id().as_deref(), Some("probe"));
    }

    #[test]
    fn configure_failure_stays_idle_and_reports_reason() {
        let tool = Tool::new(ToolDescriptor::new(
            "sim",
            ToolSpec::Port {
                port: 40,
                channel: None,
            },
        ));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        tool.subscribe(move |e| sink.lock().push(e.clone()));

        let err = tool.request_configure().unwrap_err();
        assert!(matches!(err, ToolConfigError::PortOutOfRange { port: 40, .. }));
        assert_eq!(tool.state(), ToolState::Idle);
        assert_eq!(
            *seen.lock(),
            vec![ToolEvent::ConfigurationFailed {
                reason: err.to_string()
            }]
        );
    }

    #[test]
    #[traced_test]
    fn configuration_rejection_is_logged() {
        let tool = Tool::new(ToolDescriptor::new(
            "sim",
            ToolSpec::Named {
                name: String::new(),
            },
        ));
        assert!(tool.request_configure().is_err());
        assert!(logs_contain("Tool configuration rejected"));
        assert!(logs_contain("tool identifier must not be empty"));
    }

    #[test]
    fn second_configure_is_invalid() {
        let tool = probe();
        tool.request_configure().unwrap();
        assert!(matches!(
            tool.request_configure(),
            Err(ToolConfigError::InvalidState { .. })
        ));
        assert_eq!(tool.state(), ToolState::Configured);
    }

    #[test]
    fn visibility_events_are_edge_triggered() {
        let tool = probe();
        tool.request_configure().unwrap();
        let mut events = Vec::new();
        assert!(tool.begin_staged_attach(&mut events));
        tool.staged_attach_succeeded(Weak::new(), &mut events);
        tool.streaming_started(&mut events);
        events.clear();

        let sample = RawSample::Transform(
            Transform::identity().with_stamp(TimeStamp::starting_at(0.0, 10.0)),
        );
        for _ in 0..3 {
            tool.record_sample(sample.clone(), Publication::Withheld, &mut events);
        }
        for _ in 0..3 {
            tool.mark_not_available(&mut events);
        }
        assert_eq!(kinds(&events), vec!["MadeTransitionToTracked", "NotAvailable"]);
    }

    #[test]
    fn record_sample_publishes_transform() {
        let tool = probe();
        tool.request_configure().unwrap();
        let mut events = Vec::new();
        tool.begin_staged_attach(&mut events);
        tool.staged_attach_succeeded(Weak::new(), &mut events);
        tool.streaming_started(&mut events);
        events.clear();

        let composed = Transform::from_parts([1.0, 2.0, 3.0], [1.0, 0.0, 0.0, 0.0]);
        tool.begin_update();
        assert!(!tool.is_updated());
        tool.record_sample(
            RawSample::Transform(Transform::identity()),
            Publication::Transform(composed),
            &mut events,
        );
        assert!(tool.is_updated());
        assert!(tool.is_tracked());
        assert_eq!(tool.transform(), Some(composed));
        assert_eq!(
            kinds(&events),
            vec!["MadeTransitionToTracked", "TransformModified"]
        );
    }

    #[test]
    fn dot_export_names_tool_states() {
        let dot = Tool::state_machine_dot(false);
        assert!(dot.contains("\"Configured\" -> \"Attaching\""));
    }
}
