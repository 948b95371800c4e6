//! An optional resource limiter wrapping a component's memory, cpu-ms, and
//! io-ops usage against per-component quotas.

use crate::error::ProtocolError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy)]
pub struct Quota {
    pub memory_bytes: u64,
    pub cpu_ms: u64,
    pub io_ops: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Memory,
    CpuMs,
    IoOps,
}

impl ResourceKind {
    const COUNT: usize = 3;

    fn index(self) -> usize {
        match self {
            ResourceKind::Memory => 0,
            ResourceKind::CpuMs => 1,
            ResourceKind::IoOps => 2,
        }
    }
}

type ThresholdCallback = dyn Fn(ResourceKind, u64, u64) + Send + Sync;

/// Tracks cumulative usage against a [`Quota`] and fails the operation
/// (never kills the process) when a quota is exceeded. A threshold
/// callback, if configured, fires once per upward crossing of
/// `threshold_percent` of a kind's limit (edge-triggered: it does not
/// fire again on every reservation while usage stays above the line, and
/// re-arms once usage drops back below it).
pub struct ResourceLimiter {
    quota: Quota,
    memory_used: AtomicU64,
    cpu_ms_used: AtomicU64,
    io_ops_used: AtomicU64,
    threshold_percent: Option<u8>,
    armed: [AtomicBool; ResourceKind::COUNT],
    on_threshold: Mutex<Option<Box<ThresholdCallback>>>,
}

impl ResourceLimiter {
    pub fn new(quota: Quota) -> Self {
        ResourceLimiter {
            quota,
            memory_used: AtomicU64::new(0),
            cpu_ms_used: AtomicU64::new(0),
            io_ops_used: AtomicU64::new(0),
            threshold_percent: None,
            armed: [AtomicBool::new(true), AtomicBool::new(true), AtomicBool::new(true)],
            on_threshold: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_threshold_percent(mut self, percent: u8) -> Self {
        self.threshold_percent = Some(percent);
        self
    }

    /// Register the callback invoked on each edge-triggered threshold
    /// crossing: `(kind, used, limit)`.
    pub fn on_threshold_crossed(&self, callback: impl Fn(ResourceKind, u64, u64) + Send + Sync + 'static) {
        *self.on_threshold.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(callback));
    }

    /// Whether `kind`'s usage is currently at or above `threshold_percent`
    /// of its limit. `false` if no threshold is configured.
    pub fn is_above_threshold(&self, kind: ResourceKind) -> bool {
        !self.armed[kind.index()].load(Ordering::SeqCst)
    }

    fn used_and_limit(&self, kind: ResourceKind) -> (&AtomicU64, u64) {
        match kind {
            ResourceKind::Memory => (&self.memory_used, self.quota.memory_bytes),
            ResourceKind::CpuMs => (&self.cpu_ms_used, self.quota.cpu_ms),
            ResourceKind::IoOps => (&self.io_ops_used, self.quota.io_ops),
        }
    }

    /// Reserve `amount` of `kind`. Fails with `QuotaExceeded` and leaves
    /// usage unchanged if the reservation would exceed the quota.
    pub fn reserve(&self, kind: ResourceKind, amount: u64) -> Result<(), ProtocolError> {
        let (counter, limit) = self.used_and_limit(kind);
        let mut current = counter.load(Ordering::SeqCst);
        loop {
            let next = current.saturating_add(amount);
            if next > limit {
                return Err(ProtocolError::QuotaExceeded(format!(
                    "{kind:?} quota of {limit} exceeded (would reach {next})"
                )));
            }
            match counter.compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => {
                    self.check_threshold(kind, next, limit);
                    return Ok(());
                }
                Err(observed) => current = observed,
            }
        }
    }

    pub fn release(&self, kind: ResourceKind, amount: u64) {
        let (counter, limit) = self.used_and_limit(kind);
        let clamped = amount.min(counter.load(Ordering::SeqCst));
        counter.fetch_sub(clamped, Ordering::SeqCst);
        self.check_threshold(kind, counter.load(Ordering::SeqCst), limit);
    }

    pub fn used(&self, kind: ResourceKind) -> u64 {
        self.used_and_limit(kind).0.load(Ordering::SeqCst)
    }

    fn check_threshold(&self, kind: ResourceKind, used: u64, limit: u64) {
        let Some(percent) = self.threshold_percent else {
            return;
        };
        if limit == 0 {
            return;
        }
        let crossed = used.saturating_mul(100) / limit >= u64::from(percent);
        let armed = &self.armed[kind.index()];
        if crossed {
            if armed.swap(false, Ordering::SeqCst) {
                if let Some(callback) = self.on_threshold.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
                    callback(kind, used, limit);
                }
            }
        } else {
            armed.store(true, Ordering::SeqCst);
        }
    }
}
