//! Scripted strategy for deterministic session tests.
//!
//! [`ScriptedStrategy`] replays a prepared list of fetch results, one per
//! `threaded_fetch` call, records the order in which the session invoked its
//! primitives, and lets a test make any primitive fail on demand.

use igs_core::{
    DeviceStrategy, FetchBatch, ProgressCallback, RawSample, StrategyError, StrategyResult,
    ToolInfo, ToolRecord, ToolStatus, Transform,
};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::trace;

/// Record for a tool seen at `translation` with identity rotation.
pub fn visible(id: &str, translation: [f64; 3]) -> (String, ToolRecord) {
    (
        id.to_string(),
        ToolRecord::tracked(RawSample::Transform(Transform::from_parts(
            translation,
            [1.0, 0.0, 0.0, 0.0],
        ))),
    )
}

/// Record for a tool reported with a pose but without the present flag.
pub fn hidden(id: &str) -> (String, ToolRecord) {
    (
        id.to_string(),
        ToolRecord::Reported {
            sample: RawSample::Transform(Transform::identity()),
            status: ToolStatus::ENABLED | ToolStatus::INITIALIZED,
        },
    )
}

/// Record for a tool the device explicitly reported missing.
pub fn absent(id: &str) -> (String, ToolRecord) {
    (id.to_string(), ToolRecord::Absent)
}

#[derive(Default)]
struct Script {
    cycles: VecDeque<StrategyResult<FetchBatch>>,
    repeat_last: bool,
    last: Option<FetchBatch>,
}

/// Strategy whose fetches and failures are dictated by the test.
pub struct ScriptedStrategy {
    driver_type: String,
    max_frequency: f64,
    script: Mutex<Script>,
    calls: Mutex<Vec<&'static str>>,
    failures: Mutex<HashMap<&'static str, StrategyError>>,
    fetch_delay: Mutex<Duration>,
    containers: Mutex<BTreeSet<String>>,
    progress: Mutex<Option<ProgressCallback>>,
    fetches: AtomicU64,
}

impl ScriptedStrategy {
    /// Empty script for `driver_type`.
    pub fn new(driver_type: impl Into<String>) -> Self {
        Self {
            driver_type: driver_type.into(),
            max_frequency: igs_core::strategy::DEFAULT_MAX_FREQUENCY_HZ,
            script: Mutex::new(Script::default()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            fetch_delay: Mutex::new(Duration::ZERO),
            containers: Mutex::new(BTreeSet::new()),
            progress: Mutex::new(None),
            fetches: AtomicU64::new(0),
        }
    }

    /// Override the highest accepted update frequency.
    #[must_use]
    pub fn with_max_frequency(mut self, hz: f64) -> Self {
        self.max_frequency = hz;
        self
    }

    /// Queue one batch per fetch, in order.
    #[must_use]
    pub fn with_cycles<I>(self, cycles: I) -> Self
    where
        I: IntoIterator<Item = FetchBatch>,
    {
        for batch in cycles {
            self.push_cycle(batch);
        }
        self
    }

    /// Keep returning the last scripted batch once the script runs out,
    /// instead of empty batches.
    #[must_use]
    pub fn repeating_last(self) -> Self {
        self.script.lock().repeat_last = true;
        self
    }

    /// Queue the result of the next unscripted fetch.
    pub fn push_cycle(&self, batch: FetchBatch) {
        self.script.lock().cycles.push_back(Ok(batch));
    }

    /// Queue a failing fetch.
    pub fn push_fetch_error(&self, error: StrategyError) {
        self.script.lock().cycles.push_back(Err(error));
    }

    /// Make `operation` fail with `error` until cleared.
    pub fn fail_on(&self, operation: &'static str, error: StrategyError) {
        self.failures.lock().insert(operation, error);
    }

    /// Let `operation` succeed again.
    pub fn clear_failure(&self, operation: &'static str) {
        self.failures.lock().remove(operation);
    }

    /// Sleep this long inside every fetch.
    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock() = delay;
    }

    /// Primitives invoked so far, in order. Fetches and per-cycle updates
    /// are counted, not listed.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    /// How often `operation` was invoked.
    pub fn call_count(&self, operation: &str) -> usize {
        self.calls.lock().iter().filter(|c| **c == operation).count()
    }

    /// Forget the recorded calls.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Number of `threaded_fetch` calls.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Identifiers currently in the per-tool containers.
    pub fn container_ids(&self) -> Vec<String> {
        self.containers.lock().iter().cloned().collect()
    }

    /// Scripted fetches not yet consumed.
    pub fn remaining_cycles(&self) -> usize {
        self.script.lock().cycles.len()
    }

    fn enter(&self, operation: &'static str) -> StrategyResult {
        trace!(operation, "Scripted primitive");
        self.calls.lock().push(operation);
        match self.failures.lock().get(operation) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for ScriptedStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedStrategy")
            .field("driver_type", &self.driver_type)
            .field("remaining_cycles", &self.remaining_cycles())
            .field("fetches", &self.fetch_count())
            .finish()
    }
}

impl DeviceStrategy for ScriptedStrategy {
    fn driver_type(&self) -> &str {
        &self.driver_type
    }

    fn max_frequency(&self) -> f64 {
        self.max_frequency
    }

    fn open(&self) -> StrategyResult {
        self.enter("open")?;
        let progress = self.progress.lock().clone();
        if let Some(callback) = progress {
            callback(1.0);
        }
        Ok(())
    }

    fn close(&self) -> StrategyResult {
        self.enter("close")
    }

    fn reset(&self) -> StrategyResult {
        self.enter("reset")
    }

    fn activate_tools(&self, _tools: &[ToolInfo]) -> StrategyResult {
        self.enter("activate_tools")
    }

    fn deactivate_tools(&self) -> StrategyResult {
        self.enter("deactivate_tools")
    }

    fn start_acquisition(&self) -> StrategyResult {
        self.enter("start_acquisition")
    }

    fn stop_acquisition(&self) -> StrategyResult {
        self.enter("stop_acquisition")
    }

    fn threaded_fetch(&self) -> StrategyResult<FetchBatch> {
        let delay = *self.fetch_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failures.lock().get("threaded_fetch") {
            return Err(error.clone());
        }

        let mut script = self.script.lock();
        match script.cycles.pop_front() {
            Some(Ok(batch)) => {
                script.last = Some(batch.clone());
                Ok(batch)
            }
            Some(Err(error)) => Err(error),
            None if script.repeat_last => Ok(script.last.clone().unwrap_or_default()),
            None => Ok(FetchBatch::new()),
        }
    }

    fn update(&self, _batch: &mut FetchBatch) -> StrategyResult {
        match self.failures.lock().get("update") {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn verify_tool_information(&self, _tool: &ToolInfo) -> StrategyResult {
        self.enter("verify_tool_information")
    }

    fn add_tool_to_containers(&self, tool: &ToolInfo) -> StrategyResult {
        self.enter("add_tool_to_containers")?;
        self.containers.lock().insert(tool.id.clone());
        Ok(())
    }

    fn remove_tool_from_containers(&self, tool_id: &str) -> StrategyResult {
        self.enter("remove_tool_from_containers")?;
        self.containers.lock().remove(tool_id);
        Ok(())
    }

    fn set_progress_callback(&self, callback: Option<ProgressCallback>) {
        *self.progress.lock() = callback;
    }
}
