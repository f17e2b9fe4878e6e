//! Simulated frame grabber producing test-pattern frames.

use crate::common::timing::pause;
use crate::common::{FaultInjector, MockMode, TimingConfig};
use crate::pattern::generate_test_pattern;
use anyhow::{bail, Result};
use igs_core::{
    DeviceStrategy, FetchBatch, Frame, ProgressCallback, RawSample, StrategyError,
    StrategyErrorKind, StrategyFactory, StrategyResult, ToolInfo, ToolRecord, ToolSpec,
};
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Driver type string of the simulated imager.
pub const SIM_IMAGER_DRIVER: &str = "sim_imager";

// =============================================================================
// SimulatedImagerFactory - StrategyFactory implementation
// =============================================================================

/// Configuration for the simulated imager
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulatedImagerConfig {
    /// Capture device name. Names starting with `bad` refuse to open.
    pub device: String,
    /// Frame width in pixels (default: 640)
    pub width: u32,
    /// Frame height in pixels (default: 480)
    pub height: u32,
    /// Bytes per pixel (default: 1)
    pub channels: u32,
    /// Highest frame rate the grabber accepts (default: 30 Hz)
    pub max_frequency_hz: f64,
    /// Failure probability per primitive in chaos mode
    pub failure_rate: f64,
    /// RNG seed for chaos failures
    pub seed: Option<u64>,
    /// Operational mode
    pub mode: MockMode,
}

impl Default for SimulatedImagerConfig {
    fn default() -> Self {
        Self {
            device: "sim://imager".into(),
            width: 640,
            height: 480,
            channels: 1,
            max_frequency_hz: 30.0,
            failure_rate: 0.0,
            seed: None,
            mode: MockMode::Instant,
        }
    }
}

/// Factory for creating [`SimulatedImager`] instances.
pub struct SimulatedImagerFactory;

impl StrategyFactory for SimulatedImagerFactory {
    fn driver_type(&self) -> &'static str {
        SIM_IMAGER_DRIVER
    }

    fn name(&self) -> &'static str {
        "Simulated Video Imager"
    }

    fn validate(&self, settings: &toml::Value) -> Result<()> {
        let cfg: SimulatedImagerConfig = settings.clone().try_into()?;
        if cfg.width == 0 || cfg.height == 0 || cfg.channels == 0 {
            bail!("Imager geometry must be non-zero");
        }
        if cfg.max_frequency_hz <= 0.0 {
            bail!("Imager frame rate must be positive");
        }
        Ok(())
    }

    fn build(&self, settings: toml::Value) -> Result<Arc<dyn DeviceStrategy>> {
        self.validate(&settings)?;
        let cfg: SimulatedImagerConfig = settings.try_into()?;
        Ok(Arc::new(SimulatedImager::with_config(cfg)))
    }
}

// =============================================================================
// SimulatedImager
// =============================================================================

#[derive(Debug, Default)]
struct ImagerState {
    open: bool,
    grabbing: bool,
    source: Option<String>,
    frame_num: u64,
}

/// Simulated frame grabber with a single video tool.
pub struct SimulatedImager {
    config: SimulatedImagerConfig,
    timing: TimingConfig,
    errors: FaultInjector,
    state: Mutex<ImagerState>,
    progress: Mutex<Option<ProgressCallback>>,
}

impl SimulatedImager {
    /// Imager with default configuration.
    pub fn new() -> Self {
        Self::with_config(SimulatedImagerConfig::default())
    }

    /// Imager from configuration.
    pub fn with_config(config: SimulatedImagerConfig) -> Self {
        let errors = if config.mode == MockMode::Chaos {
            FaultInjector::random(config.failure_rate, config.seed)
        } else {
            FaultInjector::none()
        };
        Self {
            config,
            timing: TimingConfig::imager(),
            errors,
            state: Mutex::new(ImagerState::default()),
            progress: Mutex::new(None),
        }
    }

    /// Frames grabbed since the last open.
    pub fn frames_grabbed(&self) -> u64 {
        self.state.lock().frame_num
    }

    fn geometry(&self) -> (u32, u32, u32) {
        (self.config.width, self.config.height, self.config.channels)
    }
}

impl Default for SimulatedImager {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStrategy for SimulatedImager {
    fn driver_type(&self) -> &str {
        SIM_IMAGER_DRIVER
    }

    fn max_frequency(&self) -> f64 {
        self.config.max_frequency_hz
    }

    #[instrument(skip(self))]
    fn open(&self) -> StrategyResult {
        self.errors.check("open")?;
        if self.config.device.starts_with("bad") {
            return Err(StrategyError::communication(format!(
                "cannot open capture device '{}'",
                self.config.device
            )));
        }
        let progress = self.progress.lock().clone();
        if let Some(callback) = &progress {
            callback(0.0);
        }
        pause(self.timing.open_step_delay(self.config.mode, 1));
        if let Some(callback) = &progress {
            callback(1.0);
        }
        let mut state = self.state.lock();
        state.open = true;
        state.frame_num = 0;
        let (width, height, channels) = self.geometry();
        info!(device = %self.config.device, width, height, channels, "Simulated imager opened");
        Ok(())
    }

    fn close(&self) -> StrategyResult {
        self.errors.check("close")?;
        let mut state = self.state.lock();
        state.open = false;
        state.grabbing = false;
        Ok(())
    }

    fn reset(&self) -> StrategyResult {
        let mut state = self.state.lock();
        if !state.open {
            return Err(StrategyError::new(
                StrategyErrorKind::InvalidState,
                "reset requires an open imager",
            ));
        }
        state.grabbing = false;
        Ok(())
    }

    fn activate_tools(&self, tools: &[ToolInfo]) -> StrategyResult {
        self.errors.check("activate_tools")?;
        if tools.len() > 1 {
            return Err(StrategyError::configuration(format!(
                "imager has a single video source, {} tools requested",
                tools.len()
            )));
        }
        Ok(())
    }

    fn deactivate_tools(&self) -> StrategyResult {
        Ok(())
    }

    fn start_acquisition(&self) -> StrategyResult {
        self.errors.check("start_acquisition")?;
        let mut state = self.state.lock();
        if !state.open {
            return Err(StrategyError::new(
                StrategyErrorKind::InvalidState,
                "start_acquisition requires an open imager",
            ));
        }
        state.grabbing = true;
        debug!("Frame grabbing started");
        Ok(())
    }

    fn stop_acquisition(&self) -> StrategyResult {
        self.errors.check("stop_acquisition")?;
        self.state.lock().grabbing = false;
        debug!("Frame grabbing stopped");
        Ok(())
    }

    fn threaded_fetch(&self) -> StrategyResult<FetchBatch> {
        pause(self.timing.fetch_delay(self.config.mode));
        self.errors.check("threaded_fetch")?;

        let (source, frame_num) = {
            let mut state = self.state.lock();
            if !state.grabbing {
                return Err(StrategyError::new(
                    StrategyErrorKind::InvalidState,
                    "imager is not grabbing",
                ));
            }
            state.frame_num += 1;
            (state.source.clone(), state.frame_num)
        };

        let mut batch = FetchBatch::new();
        if let Some(id) = source {
            let (width, height, channels) = self.geometry();
            let pixels = generate_test_pattern(width, height, channels, frame_num);
            let frame = Frame::new(width, height, channels, pixels);
            batch.insert(id, ToolRecord::tracked(RawSample::Frame(frame)));
        }
        Ok(batch)
    }

    fn verify_tool_information(&self, tool: &ToolInfo) -> StrategyResult {
        match &tool.descriptor.spec {
            ToolSpec::Video {
                width,
                height,
                channels,
                ..
            } => {
                if (*width, *height, *channels) != self.geometry() {
                    return Err(StrategyError::incompatible_tool(format!(
                        "'{}' expects {}x{}x{}, imager delivers {}x{}x{}",
                        tool.id,
                        width,
                        height,
                        channels,
                        self.config.width,
                        self.config.height,
                        self.config.channels
                    )));
                }
                Ok(())
            }
            _ => Err(StrategyError::incompatible_tool(format!(
                "'{}' is not a video tool",
                tool.id
            ))),
        }
    }

    fn add_tool_to_containers(&self, tool: &ToolInfo) -> StrategyResult {
        let mut state = self.state.lock();
        match &state.source {
            Some(existing) if existing != &tool.id => Err(StrategyError::configuration(format!(
                "video source already bound to '{existing}'"
            ))),
            _ => {
                state.source = Some(tool.id.clone());
                Ok(())
            }
        }
    }

    fn remove_tool_from_containers(&self, tool_id: &str) -> StrategyResult {
        let mut state = self.state.lock();
        if state.source.as_deref() == Some(tool_id) {
            state.source = None;
        }
        Ok(())
    }

    fn set_progress_callback(&self, callback: Option<ProgressCallback>) {
        *self.progress.lock() = callback;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use igs_core::ToolDescriptor;

    fn video(id: &str, width: u32, height: u32) -> ToolInfo {
        ToolInfo {
            id: id.into(),
            descriptor: ToolDescriptor::new(
                SIM_IMAGER_DRIVER,
                ToolSpec::Video {
                    name: id.into(),
                    width,
                    height,
                    channels: 1,
                },
            ),
        }
    }

    fn small() -> SimulatedImager {
        SimulatedImager::with_config(SimulatedImagerConfig {
            width: 64,
            height: 48,
            ..SimulatedImagerConfig::default()
        })
    }

    #[test]
    fn test_only_matching_video_tools_verify() {
        let imager = small();
        assert!(imager.verify_tool_information(&video("us", 64, 48)).is_ok());
        assert_eq!(
            imager
                .verify_tool_information(&video("us", 640, 480))
                .unwrap_err()
                .kind,
            StrategyErrorKind::IncompatibleTool
        );
    }

    fn frame_of(batch: &FetchBatch, id: &str) -> Frame {
        match &batch[id] {
            ToolRecord::Reported { sample, .. } => sample.as_frame().cloned().unwrap(),
            ToolRecord::Absent => panic!("{id} reported absent"),
        }
    }

    #[test]
    fn test_fetch_produces_consistent_frames() {
        let imager = small();
        imager.open().unwrap();
        imager.add_tool_to_containers(&video("us", 64, 48)).unwrap();
        imager.start_acquisition().unwrap();

        let frame = frame_of(&imager.threaded_fetch().unwrap(), "us");
        assert!(frame.is_consistent());
        assert_eq!(frame.pixels().len(), 64 * 48);

        let next = frame_of(&imager.threaded_fetch().unwrap(), "us");
        assert_ne!(frame.pixels(), next.pixels());
        assert_eq!(imager.frames_grabbed(), 2);
    }

    #[test]
    fn test_second_source_is_refused() {
        let imager = small();
        imager.add_tool_to_containers(&video("a", 64, 48)).unwrap();
        assert!(imager.add_tool_to_containers(&video("b", 64, 48)).is_err());
        imager.remove_tool_from_containers("a").unwrap();
        assert!(imager.add_tool_to_containers(&video("b", 64, 48)).is_ok());
    }
}
