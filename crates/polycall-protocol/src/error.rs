//! Shared error taxonomy for the protocol engine.
//!
//! Every fallible operation in this crate returns a [`ProtocolError`]. The
//! variants mirror the taxonomy a session exposes to its peer: a typed code,
//! a human-readable message, and (where applicable) whether a session
//! collapses as a result.

use std::fmt;

/// The full error taxonomy shared by every component in this crate.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Caller error; never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation illegal for the current state; caller's bug.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Peer sent malformed or out-of-sequence data; the session collapses.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A stage, idle watcher, or validation deadline expired.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Token missing, malformed, expired, or revoked.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// Policy evaluation refused the request.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// A resource quota was exceeded; caller may retry after backoff.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// A buffer is full; caller chooses to wait or drop.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The peer is gone; the session is terminal.
    #[error("transport closed: {0}")]
    TransportClosed(String),

    /// An operation this spec does not support in this configuration.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// An invariant was broken; fatal to the session, not the process.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProtocolError {
    /// The wire-visible error code, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::InvalidArgument(_) => "INVALID_ARGUMENT",
            ProtocolError::InvalidState(_) => "INVALID_STATE",
            ProtocolError::ProtocolViolation(_) => "PROTOCOL_VIOLATION",
            ProtocolError::Timeout(_) => "TIMEOUT",
            ProtocolError::InvalidToken(_) => "INVALID_TOKEN",
            ProtocolError::AccessDenied(_) => "ACCESS_DENIED",
            ProtocolError::QuotaExceeded(_) => "QUOTA_EXCEEDED",
            ProtocolError::ResourceExhausted(_) => "RESOURCE_EXHAUSTED",
            ProtocolError::TransportClosed(_) => "TRANSPORT_CLOSED",
            ProtocolError::Unsupported(_) => "UNSUPPORTED",
            ProtocolError::Internal(_) => "INTERNAL",
        }
    }

    /// Whether a session must collapse to `error` after this failure.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::ProtocolViolation(_)
                | ProtocolError::TransportClosed(_)
                | ProtocolError::Internal(_)
        )
    }
}

/// A typed error code plus human message plus correlation id, the shape a
/// peer always receives for a failed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerVisibleError {
    pub code: String,
    pub message: String,
    pub correlation_id: Option<u64>,
}

impl PeerVisibleError {
    pub fn from_error(err: &ProtocolError, correlation_id: Option<u64>) -> Self {
        PeerVisibleError {
            code: err.code().to_owned(),
            message: err.to_string(),
            correlation_id,
        }
    }
}

impl fmt::Display for PeerVisibleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.correlation_id {
            Some(cid) => write!(f, "[{}] {} (cid={})", self.code, self.message, cid),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}
