//! Deterministic time for tests that would otherwise depend on real sleeps
//! (handshake retry pacing, idle timeouts, token expiry).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A source of "now", abstracted so tests can advance time instantly
/// instead of sleeping.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wraps [`std::time::Instant`]; the default clock for production use.
#[derive(Clone)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

/// A clock whose value only moves when told to. Shareable across threads
/// via `clone()`; all clones observe the same counter.
#[derive(Clone)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock {
            millis: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_ms(&self, ms: u64) {
        self.millis.store(ms, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Lets an `Arc<dyn Clock>` be used anywhere a concrete `Clock` is
/// expected (e.g. as `HandshakeEngine<Arc<dyn Clock>>`), so callers that
/// need to pick a clock at runtime don't have to make every holder of an
/// engine generic too.
impl Clock for Arc<dyn Clock> {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}
