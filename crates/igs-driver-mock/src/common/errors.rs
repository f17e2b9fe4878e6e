//! Fault injection for simulated devices.
//!
//! A [`FaultInjector`] sits in front of every strategy operation. Each call
//! to [`FaultInjector::check`] either lets the operation through or returns
//! the [`StrategyError`] a real device would have produced.

use super::rng::SimRng;
use igs_core::{StrategyError, StrategyErrorKind, StrategyResult};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Rate key matching every operation without its own rate.
const ANY_OPERATION: &str = "*";

/// Device fault codes and their descriptions.
///
/// Every strategy instance owns its own table; nothing is process-global.
#[derive(Debug, Clone, Default)]
pub struct ErrorCodeTable {
    entries: BTreeMap<u32, &'static str>,
}

impl ErrorCodeTable {
    /// Table from `(code, description)` pairs.
    pub fn new(entries: &[(u32, &'static str)]) -> Self {
        Self {
            entries: entries.iter().copied().collect(),
        }
    }

    /// Description for `code`, if known.
    pub fn describe(&self, code: u32) -> Option<&'static str> {
        self.entries.get(&code).copied()
    }

    /// `"fault 0x0D: description"`, or just the code when unknown.
    pub fn format(&self, code: u32) -> String {
        match self.describe(code) {
            Some(text) => format!("fault 0x{code:02X}: {text}"),
            None => format!("fault 0x{code:02X}"),
        }
    }

    /// Number of known codes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A deterministic fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// `operation` succeeds `successes` times, then fails on every call.
    FailAfter {
        /// Operation name, e.g. `"open"`.
        operation: &'static str,
        /// Calls let through before failing.
        successes: u32,
    },
    /// Every call of `operation` times out.
    Timeout {
        /// Operation name.
        operation: &'static str,
    },
    /// The link drops on the next checked call and stays down.
    LinkLoss,
    /// The device latches `code` on the next checked call.
    HardwareFault {
        /// Described through the injector's [`ErrorCodeTable`].
        code: u32,
    },
}

/// Condition that fails every call until [`FaultInjector::reset`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Latch {
    #[default]
    Clear,
    LinkDown,
    Fault(u32),
}

#[derive(Debug, Default)]
struct Counters {
    calls: HashMap<&'static str, u32>,
    latch: Latch,
}

/// Decides, per operation call, whether a simulated device fails.
///
/// Clones share counters and latches, so a strategy can hand copies to its
/// worker threads.
#[derive(Clone, Debug, Default)]
pub struct FaultInjector {
    rates: Arc<HashMap<&'static str, f64>>,
    faults: Arc<Vec<Fault>>,
    rng: Arc<SimRng>,
    counters: Arc<Mutex<Counters>>,
    codes: Arc<ErrorCodeTable>,
}

impl FaultInjector {
    /// Lets every call through.
    pub fn none() -> Self {
        Self::default()
    }

    /// Fails any operation with probability `rate`, drawn from a source
    /// seeded with `seed`.
    pub fn random(rate: f64, seed: Option<u64>) -> Self {
        Self {
            rng: Arc::new(SimRng::new(seed)),
            ..Self::none()
        }
        .with_rate(ANY_OPERATION, rate)
    }

    /// Injects `fault` on top of whatever is already configured.
    #[must_use]
    pub fn with_fault(mut self, fault: Fault) -> Self {
        Arc::make_mut(&mut self.faults).push(fault);
        self
    }

    /// Random failure rate for one operation, `"*"` for all others.
    #[must_use]
    pub fn with_rate(mut self, operation: &'static str, rate: f64) -> Self {
        Arc::make_mut(&mut self.rates).insert(operation, rate);
        self
    }

    /// Fault descriptions used for [`Fault::HardwareFault`].
    #[must_use]
    pub fn with_code_table(mut self, codes: ErrorCodeTable) -> Self {
        self.codes = Arc::new(codes);
        self
    }

    /// Gate for one call of `operation`.
    pub fn check(&self, operation: &'static str) -> StrategyResult {
        let mut counters = self.counters.lock();

        for fault in self.faults.iter() {
            match *fault {
                Fault::LinkLoss => counters.latch = Latch::LinkDown,
                Fault::HardwareFault { code } if counters.latch == Latch::Clear => {
                    counters.latch = Latch::Fault(code);
                }
                _ => {}
            }
        }
        match counters.latch {
            Latch::Clear => {}
            Latch::LinkDown => return Err(StrategyError::communication("communication lost")),
            Latch::Fault(code) => return Err(StrategyError::hardware(self.codes.format(code))),
        }

        let calls = counters.calls.entry(operation).or_insert(0);
        *calls += 1;
        let calls = *calls;
        drop(counters);

        for fault in self.faults.iter() {
            match *fault {
                Fault::FailAfter {
                    operation: target,
                    successes,
                } if target == operation && calls > successes => {
                    return Err(StrategyError::hardware(format!(
                        "injected failure on '{operation}' after {successes} calls"
                    )));
                }
                Fault::Timeout { operation: target } if target == operation => {
                    return Err(StrategyError::timeout(format!(
                        "operation '{operation}' timed out"
                    )));
                }
                _ => {}
            }
        }

        let rate = self
            .rates
            .get(operation)
            .or_else(|| self.rates.get(ANY_OPERATION))
            .copied()
            .unwrap_or(0.0);
        if self.rng.chance(rate) {
            return Err(StrategyError::new(
                StrategyErrorKind::Communication,
                format!("random failure on operation '{operation}'"),
            ));
        }
        Ok(())
    }

    /// Calls of `operation` checked so far, failed or not.
    pub fn calls(&self, operation: &str) -> u32 {
        self.counters.lock().calls.get(operation).copied().unwrap_or(0)
    }

    /// Clear call counters and any latched link loss or hardware fault.
    ///
    /// Configured faults stay armed; latching ones trip again on the next
    /// call.
    pub fn reset(&self) {
        *self.counters.lock() = Counters::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_never_fails() {
        let faults = FaultInjector::none();
        assert!((0..100).all(|_| faults.check("threaded_fetch").is_ok()));
        assert_eq!(faults.calls("threaded_fetch"), 100);
    }

    #[test]
    fn test_random_rate_is_roughly_honored() {
        let faults = FaultInjector::random(0.5, Some(42));
        let failures = (0..1000)
            .filter(|_| faults.check("threaded_fetch").is_err())
            .count();
        assert!((400..600).contains(&failures), "got {failures} failures");
    }

    #[test]
    fn test_same_seed_same_failures() {
        let a = FaultInjector::random(0.5, Some(12345));
        let b = FaultInjector::random(0.5, Some(12345));
        for _ in 0..50 {
            assert_eq!(a.check("open").is_ok(), b.check("open").is_ok());
        }
    }

    #[test]
    fn test_fail_after() {
        let faults = FaultInjector::none().with_fault(Fault::FailAfter {
            operation: "threaded_fetch",
            successes: 5,
        });
        for call in 1..=5 {
            assert!(faults.check("threaded_fetch").is_ok(), "call {call}");
        }
        assert!((0..5).all(|_| faults.check("threaded_fetch").is_err()));
        assert!(faults.check("open").is_ok());
    }

    #[test]
    fn test_timeout_is_transient() {
        let faults = FaultInjector::none().with_fault(Fault::Timeout { operation: "open" });
        let err = faults.check("open").unwrap_err();
        assert_eq!(err.kind, StrategyErrorKind::Timeout);
        assert!(err.is_transient());
        assert!(faults.check("close").is_ok());
    }

    #[test]
    fn test_link_loss_fails_everything() {
        let faults = FaultInjector::none().with_fault(Fault::LinkLoss);
        let err = faults.check("threaded_fetch").unwrap_err();
        assert_eq!(err.kind, StrategyErrorKind::Communication);
        assert!(faults.check("close").is_err());
    }

    #[test]
    fn test_hardware_fault_described_by_code_table() {
        let faults = FaultInjector::none()
            .with_fault(Fault::HardwareFault { code: 0x0D })
            .with_code_table(ErrorCodeTable::new(&[(0x0D, "system not initialized")]));
        let err = faults.check("start_acquisition").unwrap_err();
        assert_eq!(err.kind, StrategyErrorKind::Hardware);
        assert_eq!(err.message, "fault 0x0D: system not initialized");
        assert!(faults.check("threaded_fetch").is_err());
    }

    #[test]
    fn test_reset_rearms_counters() {
        let faults = FaultInjector::none().with_fault(Fault::FailAfter {
            operation: "threaded_fetch",
            successes: 2,
        });
        let run = |faults: &FaultInjector| {
            (0..3)
                .map(|_| faults.check("threaded_fetch").is_ok())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(&faults), vec![true, true, false]);
        faults.reset();
        assert_eq!(run(&faults), vec![true, true, false]);
    }

    #[test]
    fn test_per_operation_rate_beats_wildcard() {
        let faults = FaultInjector::none()
            .with_rate("*", 1.0)
            .with_rate("close", 0.0);
        for _ in 0..10 {
            assert!(faults.check("open").is_err());
            assert!(faults.check("close").is_ok());
        }
    }

    #[test]
    fn test_clones_share_state() {
        let faults = FaultInjector::none().with_fault(Fault::FailAfter {
            operation: "open",
            successes: 1,
        });
        let worker = faults.clone();
        assert!(faults.check("open").is_ok());
        assert!(worker.check("open").is_err());
    }

    #[test]
    fn test_unknown_code_still_formats() {
        let table = ErrorCodeTable::new(&[(0x01, "invalid command")]);
        assert_eq!(table.format(0x42), "fault 0x42");
        assert_eq!(table.len(), 1);
        assert!(!table.is_empty());
    }
}
