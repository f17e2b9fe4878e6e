//! Simulated optical tracker.
//!
//! Tools move on a circle in front of the camera, one phase offset per tool,
//! and can be periodically occluded. Poses are derived from the fetch
//! counter rather than the wall clock, so a seeded tracker in `Instant` mode
//! replays the same trajectory every run.

use crate::common::timing::pause;
use crate::common::{ErrorCodeTable, FaultInjector, MockMode, SimRng, TimingConfig};
use anyhow::{bail, Result};
use igs_core::tool::MAX_PORT;
use igs_core::{
    DeviceStrategy, FetchBatch, ProgressCallback, RawSample, StrategyError, StrategyErrorKind,
    StrategyFactory, StrategyResult, ToolInfo, ToolRecord, ToolSpec, ToolStatus, Transform,
};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Driver type string of the simulated tracker.
pub const SIM_TRACKER_DRIVER: &str = "sim_tracker";

/// Steps reported through the progress callback while opening.
const OPEN_PROGRESS_STEPS: u32 = 4;

/// Distance of the tool orbit plane from the camera.
const ORBIT_DEPTH_MM: f64 = -1500.0;

// =============================================================================
// SimulatedTrackerFactory - StrategyFactory implementation
// =============================================================================

/// Configuration for the simulated tracker
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulatedTrackerConfig {
    /// Transport name. Names starting with `bad` refuse to open.
    pub port: String,
    /// Physical tool ports on this device (default: 4)
    pub ports: u32,
    /// Highest update frequency the device accepts (default: 60 Hz)
    pub max_frequency_hz: f64,
    /// Rate at which the device produces samples; converts fetch count to time
    pub sample_rate_hz: f64,
    /// Radius of the tool orbit in millimetres
    pub orbit_radius_mm: f64,
    /// Angular speed of the orbit in degrees per second
    pub angular_speed_deg_s: f64,
    /// Occlusion cycle length in fetches (0 = never occluded)
    pub occlusion_period: u32,
    /// Fetches per cycle during which a tool is hidden
    pub occlusion_length: u32,
    /// Uniform position noise amplitude in millimetres
    pub jitter_mm: f64,
    /// Failure probability per primitive in chaos mode
    pub failure_rate: f64,
    /// RNG seed for jitter and chaos failures
    pub seed: Option<u64>,
    /// Operational mode
    pub mode: MockMode,
}

impl Default for SimulatedTrackerConfig {
    fn default() -> Self {
        Self {
            port: "sim://tracker".into(),
            ports: 4,
            max_frequency_hz: 60.0,
            sample_rate_hz: 60.0,
            orbit_radius_mm: 100.0,
            angular_speed_deg_s: 45.0,
            occlusion_period: 0,
            occlusion_length: 0,
            jitter_mm: 0.0,
            failure_rate: 0.0,
            seed: None,
            mode: MockMode::Instant,
        }
    }
}

impl SimulatedTrackerConfig {
    /// Reject configurations the device could never run with.
    pub fn check(&self) -> Result<()> {
        if self.port.trim().is_empty() {
            bail!("Tracker port name must not be empty");
        }
        if self.ports == 0 || self.ports > MAX_PORT {
            bail!("Tracker port count must be in 1..={MAX_PORT}, got {}", self.ports);
        }
        if self.max_frequency_hz <= 0.0 || self.sample_rate_hz <= 0.0 {
            bail!("Tracker frequencies must be positive");
        }
        if self.occlusion_length > self.occlusion_period {
            bail!(
                "Occlusion length {} exceeds occlusion period {}",
                self.occlusion_length,
                self.occlusion_period
            );
        }
        if !(0.0..=1.0).contains(&self.failure_rate) {
            bail!("Failure rate must be within 0.0..=1.0");
        }
        Ok(())
    }
}

/// Factory for creating [`SimulatedTracker`] instances.
pub struct SimulatedTrackerFactory;

impl StrategyFactory for SimulatedTrackerFactory {
    fn driver_type(&self) -> &'static str {
        SIM_TRACKER_DRIVER
    }

    fn name(&self) -> &'static str {
        "Simulated Optical Tracker"
    }

    fn validate(&self, settings: &toml::Value) -> Result<()> {
        let cfg: SimulatedTrackerConfig = settings.clone().try_into()?;
        cfg.check()
    }

    fn build(&self, settings: toml::Value) -> Result<Arc<dyn DeviceStrategy>> {
        let cfg: SimulatedTrackerConfig = settings.try_into()?;
        cfg.check()?;
        Ok(Arc::new(SimulatedTracker::with_config(cfg)))
    }
}

/// Fault codes the simulated tracker can latch.
fn tracker_error_codes() -> ErrorCodeTable {
    ErrorCodeTable::new(&[
        (0x01, "invalid command"),
        (0x04, "invalid CRC"),
        (0x0C, "invalid port handle"),
        (0x0D, "system not initialized"),
        (0x0E, "no free port handles"),
        (0x23, "command not valid while tracking"),
        (0x2B, "camera temperature out of range"),
    ])
}

// =============================================================================
// SimulatedTracker
// =============================================================================

#[derive(Debug, Default)]
struct TrackerState {
    port: String,
    open: bool,
    tracking: bool,
    active: Vec<String>,
    /// Tools the tracker reports, keyed by identifier.
    containers: BTreeMap<String, ToolInfo>,
    frame: u64,
}

/// Simulated optical tracker strategy.
///
/// # Example
///
/// ```rust,ignore
/// let tracker = Arc::new(SimulatedTracker::new());
/// let session = DeviceSession::new(tracker, SessionOptions::default());
/// session.request_open().into_result()?;
/// ```
pub struct SimulatedTracker {
    config: SimulatedTrackerConfig,
    timing: TimingConfig,
    errors: FaultInjector,
    rng: SimRng,
    state: Mutex<TrackerState>,
    progress: Mutex<Option<ProgressCallback>>,
    fetches: AtomicU64,
}

impl SimulatedTracker {
    /// Tracker with default configuration.
    pub fn new() -> Self {
        Self::with_config(SimulatedTrackerConfig::default())
    }

    /// Tracker from configuration. Chaos mode injects random failures at
    /// `failure_rate`.
    pub fn with_config(config: SimulatedTrackerConfig) -> Self {
        let errors = if config.mode == MockMode::Chaos {
            FaultInjector::random(config.failure_rate, config.seed)
        } else {
            FaultInjector::none()
        };
        Self::with_errors(config, errors)
    }

    /// Tracker with an explicit fault injection setup.
    pub fn with_errors(config: SimulatedTrackerConfig, errors: FaultInjector) -> Self {
        let state = TrackerState {
            port: config.port.clone(),
            ..TrackerState::default()
        };
        Self {
            rng: SimRng::new(config.seed),
            timing: TimingConfig::tracker(),
            errors: errors.with_code_table(tracker_error_codes()),
            config,
            state: Mutex::new(state),
            progress: Mutex::new(None),
            fetches: AtomicU64::new(0),
        }
    }

    /// Point the tracker at another transport. Takes effect on the next open.
    pub fn set_port(&self, port: impl Into<String>) {
        self.state.lock().port = port.into();
    }

    /// Configuration in use.
    pub fn config(&self) -> &SimulatedTrackerConfig {
        &self.config
    }

    /// Whether the transport is open.
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Whether acquisition is running.
    pub fn is_tracking(&self) -> bool {
        self.state.lock().tracking
    }

    /// Identifiers currently in the tracker's per-tool containers.
    pub fn container_ids(&self) -> Vec<String> {
        self.state.lock().containers.keys().cloned().collect()
    }

    /// Total successful and failed fetches.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    fn require_open(&self, state: &TrackerState, operation: &str) -> StrategyResult {
        if state.open {
            Ok(())
        } else {
            Err(StrategyError::new(
                StrategyErrorKind::InvalidState,
                format!("{operation} requires an open tracker"),
            ))
        }
    }

    fn report_progress(&self, fraction: f64) {
        let callback = self.progress.lock().clone();
        if let Some(callback) = callback {
            callback(fraction);
        }
    }

    /// Pose of tool `index` of `count` at sample `frame`.
    fn pose(&self, index: usize, count: usize, frame: u64) -> Transform {
        let t = frame as f64 / self.config.sample_rate_hz;
        let phase = index as f64 * TAU / count.max(1) as f64;
        let angle = self.config.angular_speed_deg_s.to_radians() * t + phase;
        let r = self.config.orbit_radius_mm;
        let jitter = self.config.jitter_mm;
        let [dx, dy, dz] = self.rng.jitter3(jitter);
        Transform::from_axis_angle(
            [
                r * angle.cos() + dx,
                r * angle.sin() + dy,
                ORBIT_DEPTH_MM + 20.0 * index as f64 + dz,
            ],
            [0.0, 0.0, angle % TAU],
        )
        .with_error(0.1 + self.rng.jitter(jitter).abs())
    }

    fn occluded(&self, index: usize, count: usize, frame: u64) -> bool {
        let period = u64::from(self.config.occlusion_period);
        if period == 0 || self.config.occlusion_length == 0 {
            return false;
        }
        let offset = index as u64 * period / count.max(1) as u64;
        (frame + offset) % period < u64::from(self.config.occlusion_length)
    }
}

impl Default for SimulatedTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStrategy for SimulatedTracker {
    fn driver_type(&self) -> &str {
        SIM_TRACKER_DRIVER
    }

    fn max_frequency(&self) -> f64 {
        self.config.max_frequency_hz
    }

    #[instrument(skip(self))]
    fn open(&self) -> StrategyResult {
        self.errors.check("open")?;
        let port = self.state.lock().port.clone();
        if port.starts_with("bad") {
            warn!(port = %port, "Tracker port refused connection");
            return Err(StrategyError::communication(format!(
                "cannot open port '{port}'"
            )));
        }

        // Handshake: reset, baud negotiation, init, version query
        self.report_progress(0.0);
        for step in 1..=OPEN_PROGRESS_STEPS {
            pause(
                self.timing
                    .open_step_delay(self.config.mode, OPEN_PROGRESS_STEPS),
            );
            self.report_progress(f64::from(step) / f64::from(OPEN_PROGRESS_STEPS));
        }

        self.state.lock().open = true;
        info!(port = %port, ports = self.config.ports, "Simulated tracker opened");
        Ok(())
    }

    #[instrument(skip(self))]
    fn close(&self) -> StrategyResult {
        self.errors.check("close")?;
        let mut state = self.state.lock();
        state.open = false;
        state.tracking = false;
        state.active.clear();
        debug!("Simulated tracker closed");
        Ok(())
    }

    #[instrument(skip(self))]
    fn reset(&self) -> StrategyResult {
        let mut state = self.state.lock();
        self.require_open(&state, "reset")?;
        self.errors.reset();
        state.tracking = false;
        state.active.clear();
        state.frame = 0;
        debug!("Simulated tracker reset");
        Ok(())
    }

    #[instrument(skip(self, tools), fields(count = tools.len()))]
    fn activate_tools(&self, tools: &[ToolInfo]) -> StrategyResult {
        self.errors.check("activate_tools")?;
        pause(self.timing.command_delay(self.config.mode));
        let mut state = self.state.lock();
        self.require_open(&state, "activate_tools")?;
        if tools.len() > self.config.ports as usize {
            return Err(StrategyError::hardware(
                tracker_error_codes().format(0x0E),
            ));
        }
        state.active = tools.iter().map(|t| t.id.clone()).collect();
        debug!(tools = ?state.active, "Tool ports enabled");
        Ok(())
    }

    fn deactivate_tools(&self) -> StrategyResult {
        self.errors.check("deactivate_tools")?;
        self.state.lock().active.clear();
        Ok(())
    }

    #[instrument(skip(self))]
    fn start_acquisition(&self) -> StrategyResult {
        self.errors.check("start_acquisition")?;
        let mut state = self.state.lock();
        self.require_open(&state, "start_acquisition")?;
        state.tracking = true;
        info!(tools = state.containers.len(), "Tracking started");
        Ok(())
    }

    #[instrument(skip(self))]
    fn stop_acquisition(&self) -> StrategyResult {
        self.errors.check("stop_acquisition")?;
        self.state.lock().tracking = false;
        info!(fetches = self.fetch_count(), "Tracking stopped");
        Ok(())
    }

    fn threaded_fetch(&self) -> StrategyResult<FetchBatch> {
        pause(self.timing.fetch_delay(self.config.mode));
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.errors.check("threaded_fetch")?;

        let mut state = self.state.lock();
        if !state.tracking {
            return Err(StrategyError::new(
                StrategyErrorKind::InvalidState,
                "tracker is not tracking",
            ));
        }
        state.frame += 1;
        let frame = state.frame;
        let count = state.containers.len();

        let mut batch = FetchBatch::new();
        for (index, id) in state.containers.keys().enumerate() {
            let pose = self.pose(index, count, frame);
            let status = if self.occluded(index, count, frame) {
                ToolStatus::ENABLED | ToolStatus::INITIALIZED
            } else {
                ToolStatus::READY
            };
            batch.insert(
                id.clone(),
                ToolRecord::Reported {
                    sample: RawSample::Transform(pose),
                    status,
                },
            );
        }
        Ok(batch)
    }

    fn verify_tool_information(&self, tool: &ToolInfo) -> StrategyResult {
        match &tool.descriptor.spec {
            ToolSpec::Video { .. } => Err(StrategyError::incompatible_tool(format!(
                "'{}' is a video source; a tracker cannot report it",
                tool.id
            ))),
            ToolSpec::Port { port, .. } if *port > self.config.ports => {
                Err(StrategyError::configuration(format!(
                    "port {port} exceeds the {} ports of this tracker",
                    self.config.ports
                )))
            }
            _ => Ok(()),
        }
    }

    fn add_tool_to_containers(&self, tool: &ToolInfo) -> StrategyResult {
        self.errors.check("add_tool_to_containers")?;
        let mut state = self.state.lock();
        if state.containers.contains_key(&tool.id) {
            return Err(StrategyError::configuration(format!(
                "tool '{}' is already tracked",
                tool.id
            )));
        }
        state.containers.insert(tool.id.clone(), tool.clone());
        Ok(())
    }

    fn remove_tool_from_containers(&self, tool_id: &str) -> StrategyResult {
        self.errors.check("remove_tool_from_containers")?;
        let mut state = self.state.lock();
        state.containers.remove(tool_id);
        state.active.retain(|id| id != tool_id);
        Ok(())
    }

    fn set_progress_callback(&self, callback: Option<ProgressCallback>) {
        *self.progress.lock() = callback;
    }
}
