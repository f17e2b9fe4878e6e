//! Update-failure watchdog.
//!
//! Counts consecutive `UpdateFailed`/`UpdateTimedOut` events and stops
//! acquisition once the configured limit is reached. The event callback only
//! counts and signals; the stop request runs on the watchdog's own thread
//! because the callback may be running on the cadence thread that the stop
//! has to join.

use crate::error::{ControllerError, ControllerResult};
use igs_core::{DeviceSession, SessionEvent, SessionState, SubscriptionId};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

enum Signal {
    Trip { failures: u32 },
    Shutdown,
}

/// Background thread forcing a stop after repeated update failures.
pub(crate) struct Watchdog {
    session: Weak<DeviceSession>,
    subscription: SubscriptionId,
    tx: mpsc::Sender<Signal>,
    handle: Option<JoinHandle<()>>,
    trips: Arc<AtomicU32>,
}

impl Watchdog {
    /// Watch `session`; `limit` must be non-zero.
    pub(crate) fn start(session: &Arc<DeviceSession>, limit: u32) -> ControllerResult<Self> {
        let (tx, rx) = mpsc::channel();
        let failures = Arc::new(AtomicU32::new(0));
        let trips = Arc::new(AtomicU32::new(0));

        let weak = Arc::downgrade(session);
        let thread_trips = Arc::clone(&trips);
        let handle = thread::Builder::new()
            .name("igs-watchdog".into())
            .spawn(move || run(weak, rx, thread_trips))
            .map_err(|source| ControllerError::Spawn {
                thread: "watchdog",
                source,
            })?;

        let signal = tx.clone();
        let counter = Arc::clone(&failures);
        let subscription = session.subscribe(move |event| match event {
            SessionEvent::Updated | SessionEvent::Started => counter.store(0, Ordering::SeqCst),
            SessionEvent::UpdateFailed { .. } | SessionEvent::UpdateTimedOut { .. } => {
                let failures = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if failures == limit {
                    let _ = signal.send(Signal::Trip { failures });
                }
            }
            _ => {}
        });
        debug!(session = %session.id(), limit, "Update watchdog armed");

        Ok(Self {
            session: Arc::downgrade(session),
            subscription,
            tx,
            handle: Some(handle),
            trips,
        })
    }

    /// How often the watchdog stopped the session.
    pub(crate) fn trips(&self) -> u32 {
        self.trips.load(Ordering::SeqCst)
    }

    /// Unsubscribe and join the thread.
    pub(crate) fn shutdown(&mut self) {
        if let Some(session) = self.session.upgrade() {
            session.events().unsubscribe(self.subscription);
        }
        let _ = self.tx.send(Signal::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Watchdog thread panicked");
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(session: Weak<DeviceSession>, rx: mpsc::Receiver<Signal>, trips: Arc<AtomicU32>) {
    while let Ok(Signal::Trip { failures }) = rx.recv() {
        let Some(session) = session.upgrade() else {
            break;
        };
        if session.state() != SessionState::Streaming {
            continue;
        }
        warn!(
            session = %session.id(),
            failures,
            "Consecutive update failures reached the limit, stopping acquisition"
        );
        trips.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = ControllerError::check("stop", session.request_stop()) {
            error!(session = %session.id(), error = %e, "Watchdog stop failed");
        }
    }
    debug!("Watchdog thread exiting");
}
