//! Device session: the generic lifecycle engine for one physical device.
//!
//! A [`DeviceSession`] drives a [`DeviceStrategy`] from disconnected to
//! streaming through the table in [`machine`], owns the tools attached to
//! it, and runs update cycles that map per-tool samples and visibility onto
//! the tools.
//!
//! # Threads and locks
//!
//! - The **core lock** guards the state machine, the tool map, the staged
//!   tool set and the reference/world configuration. Every request takes it
//!   for its whole duration, including strategy primitives.
//! - The **buffer lock** lives in the [`AcquisitionBridge`] and is only ever
//!   held for data copies.
//! - The **cadence** slot holds the ticker thread. Stop, close, reset and
//!   drop take the ticker out and join it *before* taking the core lock, so
//!   an update tick in progress finishes (and publishes) and no later tick is
//!   scheduled.
//!
//! Events raised while the core lock is held are queued and dispatched once
//! it has been released.

mod machine;

pub use machine::{SessionInput, SessionState};

use crate::bridge::{AcquisitionBridge, AcquisitionStats};
use crate::cadence::{CadenceGenerator, TickControl};
use crate::clock::{Clock, SystemClock};
use crate::events::{EventBus, RequestOutcome, SessionEvent, SubscriptionId, ToolEvent};
use crate::sample::{compose_tool_transform, RawSample, TimeStamp, Transform};
use crate::state_machine::Symbol;
use crate::strategy::{DeviceStrategy, FetchBatch, ToolRecord, ToolStatus};
use crate::tool::{Publication, ToolHandle, ToolInfo};
use machine::{SessionAction, SessionMachine};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Default update cadence.
pub const DEFAULT_FREQUENCY_HZ: f64 = 30.0;

/// Default sample validity for trackers.
pub const DEFAULT_VALIDITY_MS: f64 = 400.0;

/// Default bound on the wait for an acquisition batch.
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_millis(500);

/// Added to the cadence period when deriving sample validity from a
/// frequency.
pub const VALIDITY_MARGIN_MS: f64 = 10.0;

/// Sample validity for a cadence frequency.
pub fn validity_for_frequency(hz: f64) -> f64 {
    1000.0 / hz + VALIDITY_MARGIN_MS
}

/// Session behaviour knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Run fetches on a dedicated acquisition thread.
    pub threaded: bool,
    /// Update cadence.
    pub frequency_hz: f64,
    /// Validity window of published samples.
    pub validity_ms: f64,
    /// Bound on the wait for an acquisition batch in threaded mode.
    pub update_timeout: Duration,
    /// Drive updates from the cadence thread. When `false` the application
    /// calls [`DeviceSession::request_update_status`] itself.
    pub cadence: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            threaded: true,
            frequency_hz: DEFAULT_FREQUENCY_HZ,
            validity_ms: DEFAULT_VALIDITY_MS,
            update_timeout: DEFAULT_UPDATE_TIMEOUT,
            cadence: true,
        }
    }
}

/// One row of the session transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTransition {
    /// Source state.
    pub from: SessionState,
    /// Input.
    pub input: SessionInput,
    /// Target state.
    pub to: SessionState,
    /// `false` for rows that only report an invalid request.
    pub valid: bool,
}

enum Pending {
    Session(SessionEvent),
    Tool(ToolHandle, Vec<ToolEvent>),
}

/// Events queued while the core lock is held.
#[derive(Default)]
struct PendingEvents {
    queue: Vec<Pending>,
}

impl PendingEvents {
    fn session(&mut self, event: SessionEvent) {
        self.queue.push(Pending::Session(event));
    }

    fn tool(&mut self, tool: &ToolHandle, f: impl FnOnce(&mut Vec<ToolEvent>)) {
        let mut events = Vec::new();
        f(&mut events);
        if !events.is_empty() {
            self.queue.push(Pending::Tool(Arc::clone(tool), events));
        }
    }

    fn dispatch(self, bus: &EventBus<SessionEvent>) {
        for pending in self.queue {
            match pending {
                Pending::Session(event) => bus.emit(&event),
                Pending::Tool(tool, events) => tool.dispatch(events),
            }
        }
    }
}

/// Outcome of one update pass, before it is reported.
enum UpdateResult {
    Published,
    Failed(String),
    TimedOut(Duration),
}

struct SessionCore {
    machine: SessionMachine,
    options: SessionOptions,
    tools: BTreeMap<String, ToolHandle>,
    staged: Vec<ToolHandle>,
    staged_attaching: Vec<ToolHandle>,
    reference: Option<String>,
    world: Option<Transform>,
    failure: Option<String>,
    requested_hz: f64,
    pending_tool: Option<ToolHandle>,
    update: Option<UpdateResult>,
}

pub(crate) struct SessionShared {
    id: Uuid,
    strategy: Arc<dyn DeviceStrategy>,
    clock: Arc<dyn Clock>,
    core: Mutex<SessionCore>,
    bridge: AcquisitionBridge,
    cadence: Mutex<Option<CadenceGenerator>>,
    state: AtomicUsize,
    events: EventBus<SessionEvent>,
}

fn state_index(state: SessionState) -> usize {
    SessionState::all()
        .iter()
        .position(|s| *s == state)
        .unwrap_or(0)
}

impl SessionShared {
    fn state(&self) -> SessionState {
        SessionState::all()
            .get(self.state.load(Ordering::SeqCst))
            .copied()
            .unwrap_or(SessionState::Idle)
    }

    /// Run `input` through the machine with the core lock held, then
    /// dispatch queued events.
    fn request(
        self: &Arc<Self>,
        input: SessionInput,
        prepare: impl FnOnce(&mut SessionCore),
    ) -> RequestOutcome {
        let mut pending = PendingEvents::default();
        let outcome = {
            let mut core = self.core.lock();
            prepare(&mut core);
            self.process(&mut core, input, &mut pending)
        };
        pending.dispatch(&self.events);
        outcome
    }

    fn process(
        self: &Arc<Self>,
        core: &mut SessionCore,
        input: SessionInput,
        pending: &mut PendingEvents,
    ) -> RequestOutcome {
        let mut outcome = RequestOutcome::Completed;
        core.machine.push_input(input);
        while let Some(step) = core.machine.process_next() {
            self.state.store(state_index(step.to), Ordering::SeqCst);
            debug!(
                session = %self.id,
                from = step.from.name(),
                input = step.input.name(),
                to = step.to.name(),
                "Session transition"
            );
            match step.action {
                SessionAction::OpenDevice => {
                    let result = self.strategy.open();
                    self.push_result(core, result.map_err(|e| e.to_string()));
                }
                SessionAction::ReportOpened => {
                    info!(session = %self.id, driver = self.strategy.driver_type(), "Device opened");
                    pending.session(SessionEvent::Opened);
                }
                SessionAction::ReportOpenFailed => {
                    let message = core.failure.take().unwrap_or_default();
                    warn!(session = %self.id, error = %message, "Device open failed");
                    pending.session(SessionEvent::OpenFailed {
                        message: message.clone(),
                    });
                    outcome = RequestOutcome::Failed(message);
                }
                SessionAction::ActivateTools => {
                    let result = self.activate_staged_tools(core, pending);
                    self.push_result(core, result);
                }
                SessionAction::AttachStagedTools => {
                    let weak = Arc::downgrade(self);
                    for tool in std::mem::take(&mut core.staged_attaching) {
                        let Some(id) = tool.id() else { continue };
                        pending.tool(&tool, |ev| tool.staged_attach_succeeded(weak.clone(), ev));
                        pending.session(SessionEvent::ToolAttached { tool: id.clone() });
                        core.tools.insert(id, tool);
                    }
                    core.staged.clear();
                    info!(session = %self.id, tools = core.tools.len(), "Tools activated");
                    pending.session(SessionEvent::Initialized);
                }
                SessionAction::ReportInitializeFailed => {
                    let message = core.failure.take().unwrap_or_default();
                    for tool in std::mem::take(&mut core.staged_attaching) {
                        pending.tool(&tool, |ev| tool.activation_failed(&message, ev));
                    }
                    core.staged.clear();
                    warn!(session = %self.id, error = %message, "Tool activation failed");
                    pending.session(SessionEvent::InitializeFailed {
                        message: message.clone(),
                    });
                    outcome = RequestOutcome::Failed(message);
                }
                SessionAction::RegisterTool => {
                    if let Err(message) = self.register_pending_tool(core, pending) {
                        outcome = RequestOutcome::Failed(message);
                    }
                }
                SessionAction::ApplyFrequency => {
                    let hz = core.requested_hz;
                    match self.strategy.validate_frequency(hz) {
                        Ok(()) => {
                            let validity_ms = validity_for_frequency(hz);
                            core.options.frequency_hz = hz;
                            core.options.validity_ms = validity_ms;
                            debug!(session = %self.id, hz, validity_ms, "Frequency set");
                            pending.session(SessionEvent::FrequencySet { hz, validity_ms });
                        }
                        Err(err) => {
                            let message = err.to_string();
                            warn!(session = %self.id, hz, error = %message, "Frequency rejected");
                            pending.session(SessionEvent::FrequencyRejected {
                                hz,
                                message: message.clone(),
                            });
                            outcome = RequestOutcome::Failed(message);
                        }
                    }
                }
                SessionAction::StartAcquisition => {
                    let result = self.start_acquisition(core);
                    self.push_result(core, result);
                }
                SessionAction::EnterStreaming => {
                    for tool in core.tools.values() {
                        pending.tool(tool, |ev| tool.streaming_started(ev));
                    }
                    info!(
                        session = %self.id,
                        threaded = core.options.threaded,
                        hz = core.options.frequency_hz,
                        "Streaming started"
                    );
                    pending.session(SessionEvent::Started);
                }
                SessionAction::ReportStartFailed => {
                    let message = core.failure.take().unwrap_or_default();
                    warn!(session = %self.id, error = %message, "Start failed");
                    pending.session(SessionEvent::StartFailed {
                        message: message.clone(),
                    });
                    outcome = RequestOutcome::Failed(message);
                }
                SessionAction::UpdateStatus => {
                    let result = self.run_update(core, pending);
                    let input = match result {
                        UpdateResult::Published => SessionInput::Success,
                        _ => SessionInput::Failure,
                    };
                    core.update = Some(result);
                    core.machine.push_input(input);
                }
                SessionAction::ReportUpdated => {
                    core.update = None;
                    pending.session(SessionEvent::Updated);
                }
                SessionAction::ReportUpdateFailed => match core.update.take() {
                    Some(UpdateResult::TimedOut(waited)) => {
                        warn!(session = %self.id, waited_ms = waited.as_millis() as u64, "Update timed out");
                        pending.session(SessionEvent::UpdateTimedOut { waited });
                        outcome = RequestOutcome::Failed(format!(
                            "no acquisition batch within {} ms",
                            waited.as_millis()
                        ));
                    }
                    Some(UpdateResult::Failed(message)) => {
                        warn!(session = %self.id, error = %message, "Update failed");
                        pending.session(SessionEvent::UpdateFailed {
                            message: message.clone(),
                        });
                        outcome = RequestOutcome::Failed(message);
                    }
                    Some(UpdateResult::Published) | None => {
                        pending.session(SessionEvent::UpdateFailed {
                            message: String::new(),
                        });
                        outcome = RequestOutcome::Failed(String::new());
                    }
                },
                SessionAction::StopAcquisition => {
                    self.bridge.stop();
                    let result = self.strategy.stop_acquisition();
                    self.push_result(core, result.map_err(|e| e.to_string()));
                }
                SessionAction::ReportStopped => {
                    for tool in core.tools.values() {
                        pending.tool(tool, |ev| tool.streaming_stopped(ev));
                    }
                    self.log_stats("Streaming stopped");
                    pending.session(SessionEvent::Stopped);
                }
                SessionAction::ResumeStreaming => {
                    let message = core.failure.take().unwrap_or_default();
                    warn!(session = %self.id, error = %message, "Stop failed, resuming streaming");
                    // Without workers the session still streams; updates then
                    // fetch on the caller's thread.
                    let message = match self.start_workers(core) {
                        Ok(()) => message,
                        Err(err) => {
                            warn!(session = %self.id, error = %err, "Worker restart failed");
                            format!("{message}; acquisition workers not restarted: {err}")
                        }
                    };
                    pending.session(SessionEvent::StopFailed {
                        message: message.clone(),
                    });
                    outcome = RequestOutcome::Failed(message);
                }
                SessionAction::CloseDevice => {
                    let result = self.close_device(core, step.from, pending);
                    self.push_result(core, result);
                }
                SessionAction::ReportClosed => {
                    info!(session = %self.id, "Device closed");
                    pending.session(SessionEvent::Closed);
                }
                SessionAction::ReportCloseFailed => {
                    let message = core.failure.take().unwrap_or_default();
                    warn!(session = %self.id, error = %message, "Device close failed");
                    pending.session(SessionEvent::CloseFailed {
                        message: message.clone(),
                    });
                    outcome = RequestOutcome::Failed(message);
                }
                SessionAction::ResetDevice => {
                    if step.from == SessionState::Streaming {
                        self.leave_streaming(core, pending);
                    }
                    match self.strategy.reset() {
                        Ok(()) => {
                            info!(session = %self.id, "Device reset");
                            pending.session(SessionEvent::ResetCompleted);
                        }
                        Err(err) => {
                            let message = err.to_string();
                            warn!(session = %self.id, error = %message, "Device reset failed");
                            pending.session(SessionEvent::ResetFailed {
                                message: message.clone(),
                            });
                            outcome = RequestOutcome::Failed(message);
                        }
                    }
                }
                SessionAction::ReportInvalidRequest => {
                    warn!(
                        session = %self.id,
                        state = step.from.name(),
                        input = step.input.name(),
                        "Invalid session request"
                    );
                    pending.session(SessionEvent::InvalidRequest {
                        state: step.from,
                        input: step.input,
                    });
                    outcome = RequestOutcome::Rejected {
                        state: step.from.name(),
                        input: step.input.name(),
                    };
                }
            }
        }
        outcome
    }

    fn push_result(&self, core: &mut SessionCore, result: Result<(), String>) {
        match result {
            Ok(()) => core.machine.push_input(SessionInput::Success),
            Err(message) => {
                core.failure = Some(message);
                core.machine.push_input(SessionInput::Failure);
            }
        }
    }

    /// Start the device, then its acquisition and cadence threads. A worker
    /// that cannot be started undoes the device start.
    fn start_acquisition(self: &Arc<Self>, core: &SessionCore) -> Result<(), String> {
        self.strategy.start_acquisition().map_err(|e| e.to_string())?;
        self.bridge.clear();
        if let Err(message) = self.start_workers(core) {
            warn!(session = %self.id, error = %message, "Worker start failed, stopping acquisition");
            self.bridge.stop();
            if let Err(err) = self.strategy.stop_acquisition() {
                warn!(session = %self.id, error = %err, "Stop acquisition failed after worker start failure");
            }
            return Err(message);
        }
        Ok(())
    }

    fn start_workers(self: &Arc<Self>, core: &SessionCore) -> Result<(), String> {
        if core.options.threaded {
            self.bridge
                .spawn(Arc::clone(&self.strategy), &self.id.to_string())
                .map_err(|e| e.to_string())?;
        }
        if core.options.cadence {
            let weak: Weak<SessionShared> = Arc::downgrade(self);
            let generator = CadenceGenerator::start(core.options.frequency_hz, move || {
                let Some(shared) = weak.upgrade() else {
                    return TickControl::Stop;
                };
                let _ = shared.request_update_status();
                if shared.state() == SessionState::Streaming {
                    TickControl::Continue
                } else {
                    TickControl::Stop
                }
            })
            .map_err(|e| format!("failed to start cadence thread: {e}"))?;
            *self.cadence.lock() = Some(generator);
        }
        Ok(())
    }

    /// Take the ticker out of its slot and join it. Must be called without
    /// the core lock held.
    fn halt_cadence(&self) {
        let generator = self.cadence.lock().take();
        if let Some(generator) = generator {
            generator.halt();
        }
    }

    /// Stop acquisition on the way out of streaming for close and reset.
    /// Failures are logged; the teardown continues.
    fn leave_streaming(&self, core: &SessionCore, pending: &mut PendingEvents) {
        self.bridge.stop();
        if let Err(err) = self.strategy.stop_acquisition() {
            warn!(session = %self.id, error = %err, "Stop acquisition failed during teardown");
        }
        for tool in core.tools.values() {
            pending.tool(tool, |ev| tool.streaming_stopped(ev));
        }
        self.log_stats("Streaming stopped");
    }

    fn close_device(
        &self,
        core: &mut SessionCore,
        from: SessionState,
        pending: &mut PendingEvents,
    ) -> Result<(), String> {
        if from == SessionState::Streaming {
            self.leave_streaming(core, pending);
        }
        if matches!(from, SessionState::Streaming | SessionState::ToolsActive) {
            if let Err(err) = self.strategy.deactivate_tools() {
                warn!(session = %self.id, error = %err, "Deactivate tools failed during close");
            }
        }
        let result = self.strategy.close().map_err(|e| e.to_string());

        // Tool bookkeeping is dropped whatever the device said.
        for (id, tool) in std::mem::take(&mut core.tools) {
            if let Err(err) = self.strategy.remove_tool_from_containers(&id) {
                debug!(session = %self.id, tool = %id, error = %err, "Container removal failed during close");
            }
            pending.tool(&tool, |ev| tool.detached_by_session(ev));
            pending.session(SessionEvent::ToolDetached { tool: id });
        }
        core.reference = None;
        self.bridge.clear();
        result
    }

    fn activate_staged_tools(
        &self,
        core: &mut SessionCore,
        pending: &mut PendingEvents,
    ) -> Result<(), String> {
        let driver = self.strategy.driver_type().to_string();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut staged: Vec<(ToolHandle, ToolInfo)> = Vec::new();

        for tool in &core.staged {
            let info = tool
                .info()
                .ok_or_else(|| "tool is not configured".to_string())?;
            if !seen.insert(info.id.clone()) {
                return Err(format!("duplicate tool identifier '{}'", info.id));
            }
            match core.tools.get(&info.id) {
                Some(existing) if Arc::ptr_eq(existing, tool) => continue,
                Some(_) => return Err(format!("duplicate tool identifier '{}'", info.id)),
                None => {}
            }
            if info.descriptor.driver_type != driver {
                return Err(format!(
                    "tool '{}' is configured for driver '{}', not '{}'",
                    info.id, info.descriptor.driver_type, driver
                ));
            }
            self.strategy
                .verify_tool_information(&info)
                .map_err(|e| format!("tool '{}' rejected: {e}", info.id))?;
            staged.push((Arc::clone(tool), info));
        }

        for (tool, info) in &staged {
            let mut events = Vec::new();
            let accepted = tool.begin_staged_attach(&mut events);
            if !events.is_empty() {
                pending.queue.push(Pending::Tool(Arc::clone(tool), events));
            }
            if !accepted {
                return Err(format!(
                    "tool '{}' cannot be attached while {}",
                    info.id,
                    tool.state()
                ));
            }
            core.staged_attaching.push(Arc::clone(tool));
        }

        let mut all: Vec<ToolInfo> = core.tools.values().filter_map(|t| t.info()).collect();
        all.extend(staged.iter().map(|(_, info)| info.clone()));
        all.sort_by(|a, b| a.id.cmp(&b.id));
        self.strategy
            .activate_tools(&all)
            .map_err(|e| e.to_string())?;

        let mut added: Vec<&str> = Vec::new();
        for (_, info) in &staged {
            if let Err(err) = self.strategy.add_tool_to_containers(info) {
                for id in added {
                    let _ = self.strategy.remove_tool_from_containers(id);
                }
                return Err(format!("tool '{}' rejected: {err}", info.id));
            }
            added.push(&info.id);
        }
        Ok(())
    }

    fn register_pending_tool(
        self: &Arc<Self>,
        core: &mut SessionCore,
        pending: &mut PendingEvents,
    ) -> Result<(), String> {
        let tool = core
            .pending_tool
            .take()
            .ok_or_else(|| "no tool to attach".to_string())?;
        let result = self.check_and_add(core, &tool);
        match &result {
            Ok(id) => {
                tool.bind_session(Arc::downgrade(self));
                core.tools.insert(id.clone(), Arc::clone(&tool));
                debug!(session = %self.id, tool = %id, "Tool registered");
                pending.session(SessionEvent::ToolAttached { tool: id.clone() });
            }
            Err(message) => {
                let id = tool.id().unwrap_or_default();
                warn!(session = %self.id, tool = %id, error = %message, "Tool registration refused");
                pending.session(SessionEvent::ToolAttachFailed {
                    tool: id,
                    message: message.clone(),
                });
            }
        }
        result.map(|_| ())
    }

    fn check_and_add(&self, core: &SessionCore, tool: &ToolHandle) -> Result<String, String> {
        let info = tool
            .info()
            .ok_or_else(|| "tool is not configured".to_string())?;
        let driver = self.strategy.driver_type();
        if info.descriptor.driver_type != driver {
            return Err(format!(
                "tool '{}' is configured for driver '{}', not '{}'",
                info.id, info.descriptor.driver_type, driver
            ));
        }
        if core.tools.contains_key(&info.id) {
            return Err(format!("duplicate tool identifier '{}'", info.id));
        }
        self.strategy
            .verify_tool_information(&info)
            .map_err(|e| format!("tool '{}' rejected: {e}", info.id))?;
        self.strategy
            .add_tool_to_containers(&info)
            .map_err(|e| format!("tool '{}' rejected: {e}", info.id))?;
        Ok(info.id)
    }

    fn run_update(&self, core: &mut SessionCore, pending: &mut PendingEvents) -> UpdateResult {
        for tool in core.tools.values() {
            tool.begin_update();
        }

        if core.options.threaded && self.bridge.is_running() {
            let timeout = core.options.update_timeout;
            if !self.bridge.wait_for_batch(timeout) {
                return UpdateResult::TimedOut(timeout);
            }
        } else {
            self.bridge.fetch_once(self.strategy.as_ref());
        }

        let drained = self.bridge.drain();
        let mut records = drained.records;
        if let Err(err) = self.strategy.update(&mut records) {
            return UpdateResult::Failed(err.to_string());
        }
        self.publish(core, records, pending);

        match drained.error {
            Some(err) => UpdateResult::Failed(err.to_string()),
            None => UpdateResult::Published,
        }
    }

    fn publish(&self, core: &SessionCore, records: FetchBatch, pending: &mut PendingEvents) {
        let stamp = TimeStamp::starting_at(self.clock.now_ms(), core.options.validity_ms);

        // A reference that is no longer attached does not gate publication.
        let reference = core
            .reference
            .as_ref()
            .filter(|id| core.tools.contains_key(id.as_str()));
        let reference_raw: Option<Transform> = reference.and_then(|id| {
            records
                .get(id)
                .filter(|record| record.is_visible())
                .and_then(|record| match record {
                    ToolRecord::Reported {
                        sample: RawSample::Transform(t),
                        ..
                    } => Some(*t),
                    _ => None,
                })
        });
        let reference_missing = reference.is_some() && reference_raw.is_none();

        for (id, record) in records {
            let Some(tool) = core.tools.get(&id) else {
                debug!(session = %self.id, tool = %id, "Sample for unknown tool dropped");
                continue;
            };
            match record {
                ToolRecord::Reported { sample, status } if status.contains(ToolStatus::READY) => {
                    let publication = match &sample {
                        RawSample::Frame(frame) => Publication::Frame(frame.with_stamp(stamp)),
                        RawSample::Transform(_) if reference_missing => Publication::Withheld,
                        RawSample::Transform(raw) => Publication::Transform(
                            compose_tool_transform(
                                raw,
                                &tool.calibration(),
                                reference_raw.as_ref(),
                                core.world.as_ref(),
                            )
                            .with_stamp(stamp),
                        ),
                    };
                    pending.tool(tool, |ev| tool.record_sample(sample, publication, ev));
                }
                _ => pending.tool(tool, |ev| tool.mark_not_available(ev)),
            }
        }
    }

    fn log_stats(&self, message: &'static str) {
        let stats = self.bridge.stats();
        info!(
            session = %self.id,
            fetches = stats.fetches,
            failures = stats.failures,
            "{}",
            message
        );
    }

    pub(crate) fn request_update_status(self: &Arc<Self>) -> RequestOutcome {
        self.request(SessionInput::UpdateStatus, |_| {})
    }

    /// Register a configured tool. Called by [`crate::tool::Tool::request_attach`]
    /// without the tool lock held.
    pub(crate) fn register_tool(self: &Arc<Self>, tool: &ToolHandle) -> Result<(), String> {
        let tool = Arc::clone(tool);
        self.request(SessionInput::AttachTool, move |core| {
            core.pending_tool = Some(tool);
        })
        .into_result()
    }

    /// Remove a tool from every per-tool container.
    pub(crate) fn unregister_tool(&self, id: &str) -> Result<(), String> {
        let mut pending = PendingEvents::default();
        let result = {
            let mut core = self.core.lock();
            match core.tools.remove(id) {
                None => Ok(()),
                Some(tool) => {
                    let removed = self.bridge.with_buffer_locked(|records| {
                        records.remove(id);
                        self.strategy.remove_tool_from_containers(id)
                    });
                    match removed {
                        Ok(()) => {
                            if core.reference.as_deref() == Some(id) {
                                debug!(session = %self.id, tool = %id, "Reference tool cleared");
                                core.reference = None;
                            }
                            debug!(session = %self.id, tool = %id, "Tool unregistered");
                            pending.session(SessionEvent::ToolDetached {
                                tool: id.to_string(),
                            });
                            Ok(())
                        }
                        Err(err) => {
                            core.tools.insert(id.to_string(), tool);
                            Err(err.to_string())
                        }
                    }
                }
            }
        };
        pending.dispatch(&self.events);
        result
    }
}

/// Lifecycle controller for one physical tracker or imager.
pub struct DeviceSession {
    shared: Arc<SessionShared>,
}

impl DeviceSession {
    /// Session over `strategy` using the wall clock.
    pub fn new(strategy: Arc<dyn DeviceStrategy>, options: SessionOptions) -> Self {
        Self::with_clock(strategy, options, Arc::new(SystemClock))
    }

    /// Session over `strategy` with an injected clock.
    pub fn with_clock(
        strategy: Arc<dyn DeviceStrategy>,
        options: SessionOptions,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let id = Uuid::new_v4();
        debug!(session = %id, driver = strategy.driver_type(), "Session created");
        Self {
            shared: Arc::new(SessionShared {
                id,
                strategy,
                clock,
                core: Mutex::new(SessionCore {
                    machine: machine::build(),
                    options,
                    tools: BTreeMap::new(),
                    staged: Vec::new(),
                    staged_attaching: Vec::new(),
                    reference: None,
                    world: None,
                    failure: None,
                    requested_hz: 0.0,
                    pending_tool: None,
                    update: None,
                }),
                bridge: AcquisitionBridge::new(),
                cadence: Mutex::new(None),
                state: AtomicUsize::new(state_index(SessionState::Idle)),
                events: EventBus::new(),
            }),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<SessionShared> {
        &self.shared
    }

    /// Session identity used in logs.
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Driver type of the strategy.
    pub fn driver_type(&self) -> &str {
        self.shared.strategy.driver_type()
    }

    /// Strategy driving the device.
    pub fn strategy(&self) -> &Arc<dyn DeviceStrategy> {
        &self.shared.strategy
    }

    /// Session event observers.
    pub fn events(&self) -> &EventBus<SessionEvent> {
        &self.shared.events
    }

    /// Observe every session event.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(callback)
    }

    /// Establish communication with the device.
    #[instrument(skip_all, fields(session = %self.shared.id))]
    pub fn request_open(&self) -> RequestOutcome {
        self.shared.request(SessionInput::Open, |_| {})
    }

    /// Activate `tools` and attach them. Tools already attached to this
    /// session are kept and re-activated.
    #[instrument(skip_all, fields(session = %self.shared.id, tools = tools.len()))]
    pub fn request_initialize(&self, tools: &[ToolHandle]) -> RequestOutcome {
        let tools = tools.to_vec();
        self.shared
            .request(SessionInput::Initialize, move |core| core.staged = tools)
    }

    /// Start acquisition.
    #[instrument(skip_all, fields(session = %self.shared.id))]
    pub fn request_start(&self) -> RequestOutcome {
        self.shared.request(SessionInput::Start, |_| {})
    }

    /// Run one update cycle now.
    pub fn request_update_status(&self) -> RequestOutcome {
        self.shared.request_update_status()
    }

    /// Stop acquisition.
    #[instrument(skip_all, fields(session = %self.shared.id))]
    pub fn request_stop(&self) -> RequestOutcome {
        self.shared.halt_cadence();
        self.shared.request(SessionInput::Stop, |_| {})
    }

    /// Reset the device. The session ends up `Connected`.
    #[instrument(skip_all, fields(session = %self.shared.id))]
    pub fn request_reset(&self) -> RequestOutcome {
        self.shared.halt_cadence();
        self.shared.request(SessionInput::Reset, |_| {})
    }

    /// Stop if streaming, deactivate tools, release the device and detach
    /// every tool.
    #[instrument(skip_all, fields(session = %self.shared.id))]
    pub fn request_close(&self) -> RequestOutcome {
        self.shared.halt_cadence();
        self.shared.request(SessionInput::Close, |_| {})
    }

    /// Change the cadence frequency. Sample validity becomes
    /// `1000 / hz + 10` ms.
    #[instrument(skip_all, fields(session = %self.shared.id, hz = hz))]
    pub fn request_set_frequency(&self, hz: f64) -> RequestOutcome {
        self.shared
            .request(SessionInput::SetFrequency, |core| core.requested_hz = hz)
    }

    /// Attach a configured tool.
    pub fn attach_tool(&self, tool: &ToolHandle) -> RequestOutcome {
        tool.request_attach(self)
    }

    /// Detach a tool. Always legal.
    pub fn detach_tool(&self, tool: &ToolHandle) -> RequestOutcome {
        tool.request_detach()
    }

    /// Designate the tool whose raw sample defines the moving frame, or
    /// clear it. The tool must be configured.
    pub fn set_reference_tool(&self, tool: Option<&ToolHandle>) -> bool {
        let id = match tool {
            None => None,
            Some(tool) => match tool.id() {
                Some(id) => Some(id),
                None => return false,
            },
        };
        debug!(session = %self.shared.id, reference = ?id, "Reference tool set");
        self.shared.core.lock().reference = id;
        true
    }

    /// Identifier of the reference tool.
    pub fn reference_tool_id(&self) -> Option<String> {
        self.shared.core.lock().reference.clone()
    }

    /// Attached reference tool.
    pub fn reference_tool(&self) -> Option<ToolHandle> {
        let core = self.shared.core.lock();
        core.reference
            .as_ref()
            .and_then(|id| core.tools.get(id).cloned())
    }

    /// Set or clear the world ("patient") transform.
    pub fn set_world_transform(&self, world: Option<Transform>) {
        self.shared.core.lock().world = world;
    }

    /// World transform.
    pub fn world_transform(&self) -> Option<Transform> {
        self.shared.core.lock().world
    }

    /// Attached tools ordered by identifier.
    pub fn attached_tools(&self) -> Vec<ToolHandle> {
        self.shared.core.lock().tools.values().cloned().collect()
    }

    /// Attached tool by identifier.
    pub fn tool(&self, id: &str) -> Option<ToolHandle> {
        self.shared.core.lock().tools.get(id).cloned()
    }

    /// Current cadence frequency.
    pub fn frequency_hz(&self) -> f64 {
        self.shared.core.lock().options.frequency_hz
    }

    /// Current sample validity.
    pub fn validity_ms(&self) -> f64 {
        self.shared.core.lock().options.validity_ms
    }

    /// Copy of the session options.
    pub fn options(&self) -> SessionOptions {
        self.shared.core.lock().options.clone()
    }

    /// Acquisition thread counters.
    pub fn acquisition_stats(&self) -> AcquisitionStats {
        self.shared.bridge.stats()
    }

    /// Whether the acquisition thread is running.
    pub fn acquisition_running(&self) -> bool {
        self.shared.bridge.is_running()
    }

    /// Every `(state, input)` row of the session transition table.
    pub fn transition_table() -> Vec<SessionTransition> {
        machine::build()
            .transitions()
            .map(|t| SessionTransition {
                from: t.from,
                input: t.input,
                to: t.to,
                valid: t.valid,
            })
            .collect()
    }

    /// Graphviz rendering of the session state machine.
    pub fn state_machine_dot(include_invalid: bool) -> String {
        machine::build().export_dot(include_invalid)
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if self.state() != SessionState::Idle {
            debug!(session = %self.shared.id, state = %self.state(), "Closing session on drop");
            if let Err(e) = self.request_close().into_result() {
                warn!(session = %self.shared.id, error = %e, "Close on drop failed");
            }
        }
        self.shared.halt_cadence();
        self.shared.bridge.stop();
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("id", &self.shared.id)
            .field("driver_type", &self.driver_type())
            .field("state", &self.state().name())
            .finish()
    }
}
