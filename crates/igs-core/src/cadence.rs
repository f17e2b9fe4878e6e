//! Fixed-frequency ticker driving update cycles while streaming.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Whether the ticker should keep running after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickControl {
    /// Schedule the next tick.
    Continue,
    /// Exit the ticker thread.
    Stop,
}

struct CadenceShared {
    halted: Mutex<bool>,
    wake: Condvar,
    ticks: AtomicU64,
}

/// Ticker thread calling a closure at a fixed frequency.
///
/// Ticks are scheduled on a fixed grid from the start time; a tick that
/// overruns its period makes the ticker skip the missed slots rather than
/// firing a burst. [`CadenceGenerator::halt`] lets a tick in progress finish
/// and guarantees no tick starts afterwards.
pub struct CadenceGenerator {
    shared: Arc<CadenceShared>,
    handle: Option<JoinHandle<()>>,
    frequency_hz: f64,
}

impl CadenceGenerator {
    /// Start ticking at `frequency_hz`.
    ///
    /// A frequency that is not finite and positive, or whose period does
    /// not fit a [`Duration`], is refused with [`io::ErrorKind::InvalidInput`].
    pub fn start<F>(frequency_hz: f64, mut tick: F) -> io::Result<Self>
    where
        F: FnMut() -> TickControl + Send + 'static,
    {
        let period = period_for(frequency_hz).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unusable cadence frequency {frequency_hz} Hz"),
            )
        })?;
        let shared = Arc::new(CadenceShared {
            halted: Mutex::new(false),
            wake: Condvar::new(),
            ticks: AtomicU64::new(0),
        });

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("igs-cadence".into())
            .spawn(move || {
                let origin = Instant::now();
                let mut slot: u32 = 1;
                loop {
                    let Some(deadline) = period
                        .checked_mul(slot)
                        .and_then(|offset| origin.checked_add(offset))
                    else {
                        break;
                    };
                    {
                        let mut halted = thread_shared.halted.lock();
                        while !*halted && Instant::now() < deadline {
                            thread_shared.wake.wait_until(&mut halted, deadline);
                        }
                        if *halted {
                            break;
                        }
                    }

                    thread_shared.ticks.fetch_add(1, Ordering::SeqCst);
                    if tick() == TickControl::Stop {
                        break;
                    }

                    let elapsed = origin.elapsed();
                    let next = (elapsed.as_secs_f64() / period.as_secs_f64()).floor() as u32 + 1;
                    slot = next.max(slot + 1);
                }
                debug!(
                    ticks = thread_shared.ticks.load(Ordering::SeqCst),
                    "Cadence thread exiting"
                );
            })?;

        Ok(Self {
            shared,
            handle: Some(handle),
            frequency_hz,
        })
    }

    /// Ticking frequency.
    pub fn frequency_hz(&self) -> f64 {
        self.frequency_hz
    }

    /// Ticks fired so far.
    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::SeqCst)
    }

    /// Stop ticking and wait for a tick in progress to finish.
    ///
    /// When called from inside a tick the thread is not joined; it exits as
    /// soon as the current tick returns.
    pub fn halt(mut self) {
        self.signal_and_join();
    }

    fn signal_and_join(&mut self) {
        *self.shared.halted.lock() = true;
        self.shared.wake.notify_all();

        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if let Err(e) = handle.join() {
            error!("Cadence thread panicked: {:?}", e);
        }
    }
}

fn period_for(frequency_hz: f64) -> Option<Duration> {
    if !(frequency_hz.is_finite() && frequency_hz > 0.0) {
        return None;
    }
    Duration::try_from_secs_f64(frequency_hz.recip())
        .ok()
        .filter(|period| !period.is_zero())
}

impl Drop for CadenceGenerator {
    fn drop(&mut self) {
        self.signal_and_join();
    }
}

impl std::fmt::Debug for CadenceGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CadenceGenerator")
            .field("frequency_hz", &self.frequency_hz)
            .field("ticks", &self.ticks())
            .finish()
    }
}
