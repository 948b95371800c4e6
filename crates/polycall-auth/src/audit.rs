//! Append-only event stream of authentication and authorization outcomes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A source of "now" in milliseconds, injectable so coalescing windows are
/// testable without real sleeps.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wraps [`std::time::Instant`]; the default clock for production use.
#[derive(Clone)]
pub struct SystemClock {
    epoch: std::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            epoch: std::time::Instant::now(),
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditEventKind {
    Login,
    TokenIssue,
    TokenValidate,
    TokenRevoke,
    RoleAssign,
    RoleRemove,
    PolicyCreate,
    PolicyUpdate,
    AccessGranted,
    AccessDenied,
    Custom,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub kind: AuditEventKind,
    pub identity_id: Option<String>,
    pub resource: Option<String>,
    pub action: Option<String>,
    pub success: bool,
    pub timestamp_ms: u64,
    pub details: Option<String>,
}

/// Pluggable audit sink.
pub trait AuditLog: Send + Sync {
    fn record(&self, event: AuditEvent);
    fn events(&self) -> Vec<AuditEvent>;
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct CoalesceKey {
    kind: AuditEventKind,
    identity_id: Option<String>,
    resource: Option<String>,
    action: Option<String>,
    details: Option<String>,
}

/// A buffered in-memory ring: overflow drops the oldest event. Repeated
/// identical failures within `coalesce_window_ms` of each other are
/// folded into a single stored event (with the original timestamp) to
/// avoid one flapping client drowning out the log.
pub struct InMemoryAuditLog {
    clock: Arc<dyn Clock>,
    capacity: usize,
    coalesce_window_ms: u64,
    events: Mutex<Vec<AuditEvent>>,
    last_seen: Mutex<HashMap<CoalesceKey, u64>>,
    dropped: AtomicU64,
}

impl InMemoryAuditLog {
    pub fn new(capacity: usize, coalesce_window_ms: u64, clock: Arc<dyn Clock>) -> Self {
        InMemoryAuditLog {
            clock,
            capacity,
            coalesce_window_ms,
            events: Mutex::new(Vec::new()),
            last_seen: Mutex::new(HashMap::new()),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }
}

impl AuditLog for InMemoryAuditLog {
    fn record(&self, event: AuditEvent) {
        if !event.success {
            let key = CoalesceKey {
                kind: event.kind,
                identity_id: event.identity_id.clone(),
                resource: event.resource.clone(),
                action: event.action.clone(),
                details: event.details.clone(),
            };
            let now = self.clock.now_ms();
            let mut last_seen = self.last_seen.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(&last) = last_seen.get(&key) {
                if now.saturating_sub(last) < self.coalesce_window_ms {
                    return;
                }
            }
            last_seen.insert(key, now);
        }

        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        if events.len() >= self.capacity {
            events.remove(0);
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }
        events.push(event);
    }

    fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
