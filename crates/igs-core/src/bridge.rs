//! Acquisition thread bridge.
//!
//! Producer/consumer buffer between the acquisition thread, which loops on
//! [`DeviceStrategy::threaded_fetch`], and the foreground update step.
//!
//! ```text
//!   acquisition thread                  foreground update
//!   ──────────────────                  ─────────────────
//!   threaded_fetch()  ──► SharedBuffer ──► wait_for_batch(timeout)
//!                         (tool id →      drain()
//!                          ToolRecord,
//!                          generation)
//! ```
//!
//! One `parking_lot::Mutex` guards the buffer and the critical section is a
//! pure data copy: device I/O happens before the lock is taken and observer
//! notification happens after the foreground drained the batch. The thread
//! signals the condvar after every fetch, successful or not, so a failing
//! device surfaces as an update failure instead of a stall.

use crate::error::{StrategyError, StrategyResult};
use crate::strategy::{DeviceStrategy, FetchBatch};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Pause after a fetch that produced an empty batch.
const IDLE_BACKOFF: Duration = Duration::from_millis(1);

/// Counters kept by the acquisition thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquisitionStats {
    /// Fetch primitives executed.
    pub fetches: u64,
    /// Fetch primitives that returned an error.
    pub failures: u64,
}

/// Contents handed to the foreground by [`AcquisitionBridge::drain`].
#[derive(Debug, Default)]
pub struct DrainedBatch {
    /// Latest record per tool since the previous drain.
    pub records: FetchBatch,
    /// Most recent fetch error since the previous drain.
    pub error: Option<StrategyError>,
    /// Generation the drain consumed.
    pub generation: u64,
}

#[derive(Default)]
struct SharedBuffer {
    records: FetchBatch,
    last_error: Option<StrategyError>,
    generation: u64,
    consumed: u64,
}

struct BridgeShared {
    buffer: Mutex<SharedBuffer>,
    ready: Condvar,
    running: AtomicBool,
    fetches: AtomicU64,
    failures: AtomicU64,
}

impl BridgeShared {
    fn publish(&self, result: StrategyResult<FetchBatch>) {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let mut buffer = self.buffer.lock();
        match result {
            Ok(batch) => {
                // Newer news about a tool replaces older undrained news.
                buffer.records.extend(batch);
            }
            Err(err) => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                buffer.last_error = Some(err);
            }
        }
        buffer.generation += 1;
        drop(buffer);
        self.ready.notify_all();
    }
}

/// Shared buffer plus the optional acquisition thread feeding it.
pub struct AcquisitionBridge {
    shared: Arc<BridgeShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AcquisitionBridge {
    /// Empty bridge with no thread running.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(BridgeShared {
                buffer: Mutex::new(SharedBuffer::default()),
                ready: Condvar::new(),
                running: AtomicBool::new(false),
                fetches: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the acquisition thread. No-op if it is already running.
    pub fn spawn(&self, strategy: Arc<dyn DeviceStrategy>, session: &str) -> StrategyResult {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        self.shared.fetches.store(0, Ordering::SeqCst);
        self.shared.failures.store(0, Ordering::SeqCst);
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let session = session.to_string();
        let handle = thread::Builder::new()
            .name("igs-acquisition".into())
            .spawn(move || {
                debug!(session = %session, "Acquisition thread started");
                while shared.running.load(Ordering::SeqCst) {
                    let result = strategy.threaded_fetch();
                    let idle = matches!(&result, Ok(batch) if batch.is_empty());
                    if let Err(err) = &result {
                        warn!(session = %session, error = %err, "Threaded fetch failed");
                    }
                    shared.publish(result);
                    if idle {
                        thread::sleep(IDLE_BACKOFF);
                    }
                }
                info!(
                    session = %session,
                    fetches = shared.fetches.load(Ordering::SeqCst),
                    failures = shared.failures.load(Ordering::SeqCst),
                    "Acquisition thread exiting"
                );
            })
            .map_err(|e| {
                self.shared.running.store(false, Ordering::SeqCst);
                StrategyError::hardware(format!("failed to spawn acquisition thread: {e}"))
            })?;

        *worker = Some(handle);
        Ok(())
    }

    /// Stop and join the acquisition thread. No-op if none is running.
    ///
    /// A fetch in progress is allowed to finish; its result still lands in
    /// the buffer.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.join() {
                error!("Acquisition thread panicked: {:?}", e);
            }
        }
    }

    /// Whether the acquisition thread is running.
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Run one fetch on the calling thread and publish its result.
    pub fn fetch_once(&self, strategy: &dyn DeviceStrategy) {
        self.shared.publish(strategy.threaded_fetch());
    }

    /// Block until a batch newer than the last drain is available.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_for_batch(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut buffer = self.shared.buffer.lock();
        while buffer.generation <= buffer.consumed {
            if self.shared.ready.wait_until(&mut buffer, deadline).timed_out() {
                return buffer.generation > buffer.consumed;
            }
        }
        true
    }

    /// Take everything published since the previous drain, atomically.
    pub fn drain(&self) -> DrainedBatch {
        let mut buffer = self.shared.buffer.lock();
        buffer.consumed = buffer.generation;
        DrainedBatch {
            records: std::mem::take(&mut buffer.records),
            error: buffer.last_error.take(),
            generation: buffer.generation,
        }
    }

    /// Remove a tool's pending record.
    pub fn purge(&self, tool_id: &str) {
        self.shared.buffer.lock().records.remove(tool_id);
    }

    /// Run `f` while holding the buffer lock.
    ///
    /// Used to purge a tool from several containers atomically with respect
    /// to the update cycle.
    pub fn with_buffer_locked<R>(&self, f: impl FnOnce(&mut FetchBatch) -> R) -> R {
        let mut buffer = self.shared.buffer.lock();
        f(&mut buffer.records)
    }

    /// Drop all pending records and errors and mark everything consumed.
    pub fn clear(&self) {
        let mut buffer = self.shared.buffer.lock();
        buffer.records.clear();
        buffer.last_error = None;
        buffer.consumed = buffer.generation;
    }

    /// Generation counter, incremented after every fetch.
    pub fn generation(&self) -> u64 {
        self.shared.buffer.lock().generation
    }

    /// Counters of the current or last acquisition thread.
    pub fn stats(&self) -> AcquisitionStats {
        AcquisitionStats {
            fetches: self.shared.fetches.load(Ordering::SeqCst),
            failures: self.shared.failures.load(Ordering::SeqCst),
        }
    }
}

impl Default for AcquisitionBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AcquisitionBridge {
    fn drop(&mut self) {
        self.stop();
    }
}
