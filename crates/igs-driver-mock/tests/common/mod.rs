//! Shared helpers for the session integration tests.

#![allow(dead_code)]

use igs_core::{
    DeviceSession, EventKind, SessionEvent, SessionOptions, Tool, ToolDescriptor, ToolEvent,
    ToolHandle, ToolSpec,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

pub const DRIVER: &str = "scripted";

/// Collects events delivered to a callback.
pub struct Recorder<E> {
    events: Arc<Mutex<Vec<E>>>,
}

impl<E: Clone + EventKind + Send + 'static> Recorder<E> {
    pub fn events(&self) -> Vec<E> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(EventKind::kind).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

pub fn record_session(session: &DeviceSession) -> Recorder<SessionEvent> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let _ = session.subscribe(move |event| sink.lock().push(event.clone()));
    Recorder { events }
}

pub fn record_tool(tool: &ToolHandle) -> Recorder<ToolEvent> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let _ = tool.subscribe(move |event| sink.lock().push(event.clone()));
    Recorder { events }
}

/// Updates driven by the test, fetches on the calling thread.
pub fn manual_options() -> SessionOptions {
    SessionOptions {
        threaded: false,
        cadence: false,
        ..SessionOptions::default()
    }
}

/// Configured tool with an explicit name on a free port.
pub fn named_tool(driver: &str, name: &str, port: u32) -> ToolHandle {
    let tool = Tool::new(
        ToolDescriptor::new(
            driver,
            ToolSpec::Port {
                port,
                channel: None,
            },
        )
        .with_name(name),
    );
    tool.request_configure().unwrap();
    tool
}

/// Poll `check` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    check()
}
