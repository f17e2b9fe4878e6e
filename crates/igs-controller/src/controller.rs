//! Session controller: configuration in, running device session out.
//!
//! [`SessionController`] is the only component application code needs to
//! touch. Each request blocks until the session reaches its terminal
//! success or failure state and returns exactly one result.

use crate::config::{DeviceConfig, ToolConfig};
use crate::error::{ControllerError, ControllerResult};
use crate::registry::StrategyRegistry;
use crate::watchdog::Watchdog;
use igs_core::{
    DeviceSession, ProgressCallback, SessionEvent, SessionState, SubscriptionId, Tool,
    ToolHandle,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

struct ActiveSession {
    session: Arc<DeviceSession>,
    watchdog: Option<Watchdog>,
}

/// Blocking facade over one [`DeviceSession`].
pub struct SessionController {
    registry: Arc<StrategyRegistry>,
    active: Mutex<Option<ActiveSession>>,
}

impl SessionController {
    /// Controller resolving drivers through `registry`.
    pub fn new(registry: Arc<StrategyRegistry>) -> Self {
        Self {
            registry,
            active: Mutex::new(None),
        }
    }

    /// Build, open and activate the session described by `config`.
    ///
    /// Steps: resolve the strategy factory, build the strategy, set the
    /// frequency, open (forwarding connection progress to `progress`),
    /// configure the reference and regular tools, set the reference and
    /// world transforms, then activate the tool set. On failure anything
    /// already opened is closed again.
    #[instrument(skip_all, fields(driver = %config.driver))]
    pub fn initialize(
        &self,
        config: &DeviceConfig,
        progress: Option<ProgressCallback>,
    ) -> ControllerResult {
        if self.active.lock().is_some() {
            return Err(ControllerError::AlreadyInitialized);
        }
        config.validate()?;

        let strategy = self
            .registry
            .build(&config.driver, config.settings.clone())?;
        if config.validity_ms.is_some() {
            strategy
                .validate_frequency(config.frequency_hz)
                .map_err(|e| ControllerError::Request {
                    operation: "set frequency",
                    message: e.to_string(),
                })?;
        }
        let session = Arc::new(DeviceSession::new(
            Arc::clone(&strategy),
            config.session_options(),
        ));

        let result = Self::bring_up(&session, config, progress);
        strategy.set_progress_callback(None);
        if let Err(e) = result {
            warn!(error = %e, "Initialization failed, releasing the device");
            if session.state() != SessionState::Idle {
                let _ = session.request_close();
            }
            return Err(e);
        }

        let watchdog = match config.max_consecutive_update_failures {
            0 => None,
            limit => match Watchdog::start(&session, limit) {
                Ok(watchdog) => Some(watchdog),
                Err(e) => {
                    let _ = session.request_close();
                    return Err(e);
                }
            },
        };

        let mut active = self.active.lock();
        if active.is_some() {
            drop(active);
            let _ = session.request_close();
            return Err(ControllerError::AlreadyInitialized);
        }
        info!(
            session = %session.id(),
            tools = session.attached_tools().len(),
            "Session initialized"
        );
        *active = Some(ActiveSession { session, watchdog });
        Ok(())
    }

    fn bring_up(
        session: &Arc<DeviceSession>,
        config: &DeviceConfig,
        progress: Option<ProgressCallback>,
    ) -> ControllerResult {
        if config.validity_ms.is_none() {
            ControllerError::check(
                "set frequency",
                session.request_set_frequency(config.frequency_hz),
            )?;
        }

        session.strategy().set_progress_callback(progress);
        ControllerError::check("open", session.request_open())?;

        let reference = config
            .reference
            .as_ref()
            .map(|tool| configure_tool(tool, &config.driver))
            .transpose()?;
        let mut tools = Vec::with_capacity(config.tools.len() + 1);
        tools.extend(reference.iter().cloned());
        for tool in &config.tools {
            tools.push(configure_tool(tool, &config.driver)?);
        }

        if let Some(reference) = &reference {
            session.set_reference_tool(Some(reference));
        }
        if let Some(world) = &config.world_transform {
            session.set_world_transform(Some(world.to_transform()?));
        }

        ControllerError::check("initialize", session.request_initialize(&tools))
    }

    /// Start acquisition.
    #[instrument(skip(self))]
    pub fn start(&self) -> ControllerResult {
        let session = self.session()?;
        ControllerError::check("start", session.request_start())
    }

    /// Stop acquisition.
    #[instrument(skip(self))]
    pub fn stop(&self) -> ControllerResult {
        let session = self.session()?;
        ControllerError::check("stop", session.request_stop())
    }

    /// Stop if streaming, close the device and forget the session.
    ///
    /// Succeeds without doing anything when no session is initialized.
    #[instrument(skip(self))]
    pub fn shutdown(&self) -> ControllerResult {
        let Some(mut active) = self.active.lock().take() else {
            debug!("Shutdown without an active session");
            return Ok(());
        };
        if let Some(watchdog) = active.watchdog.as_mut() {
            watchdog.shutdown();
        }

        let session = active.session;
        if session.state() == SessionState::Streaming {
            if let Err(e) = ControllerError::check("stop", session.request_stop()) {
                warn!(error = %e, "Stop failed during shutdown, closing anyway");
            }
        }
        let result = match session.state() {
            SessionState::Idle => Ok(()),
            _ => ControllerError::check("close", session.request_close()),
        };
        info!(session = %session.id(), ok = result.is_ok(), "Session shut down");
        result
    }

    /// The running session.
    pub fn session(&self) -> ControllerResult<Arc<DeviceSession>> {
        self.active
            .lock()
            .as_ref()
            .map(|active| Arc::clone(&active.session))
            .ok_or(ControllerError::NotInitialized)
    }

    /// Whether a session is initialized.
    pub fn is_initialized(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Session state, if initialized.
    pub fn state(&self) -> Option<SessionState> {
        self.session().ok().map(|session| session.state())
    }

    /// Observe the session's events.
    pub fn subscribe<F>(&self, callback: F) -> ControllerResult<SubscriptionId>
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        Ok(self.session()?.subscribe(callback))
    }

    /// Attached tools ordered by identifier. Empty before initialization.
    pub fn attached_tools(&self) -> Vec<ToolHandle> {
        self.session()
            .map(|session| session.attached_tools())
            .unwrap_or_default()
    }

    /// Attached tool by identifier.
    pub fn tool(&self, name: &str) -> Option<ToolHandle> {
        self.session().ok().and_then(|session| session.tool(name))
    }

    /// The attached reference tool.
    pub fn reference_tool(&self) -> Option<ToolHandle> {
        self.session().ok().and_then(|session| session.reference_tool())
    }

    /// Attached tools except the reference, ordered by identifier.
    pub fn non_reference_tools(&self) -> Vec<ToolHandle> {
        let Ok(session) = self.session() else {
            return Vec::new();
        };
        let reference = session.reference_tool_id();
        session
            .attached_tools()
            .into_iter()
            .filter(|tool| tool.id() != reference)
            .collect()
    }

    /// How often the update watchdog forced a stop.
    pub fn watchdog_trips(&self) -> u32 {
        self.active
            .lock()
            .as_ref()
            .and_then(|active| active.watchdog.as_ref())
            .map_or(0, Watchdog::trips)
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "Shutdown on drop failed");
        }
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("registry", &self.registry)
            .field("state", &self.state())
            .finish()
    }
}

fn configure_tool(config: &ToolConfig, driver: &str) -> ControllerResult<ToolHandle> {
    let descriptor = config.descriptor(driver)?;
    let label = descriptor.derive_identifier();
    let tool = Tool::new(descriptor);
    tool.request_configure()
        .map_err(|source| ControllerError::Tool { tool: label, source })?;
    Ok(tool)
}
