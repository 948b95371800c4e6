//! The typed message envelope that flows over a session.
//!
//! A [`Message`] is kind-tagged (a namespaced string such as `"auth.login"`
//! or the well-known constants below), flag-annotated, and carries an
//! opaque payload plus optional correlation id, auth token, and
//! resource/action metadata for policy checks.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A message kind: a namespaced string, not a closed enum, because the
/// handler registry in the protocol context dispatches by kind string and
/// new kinds (command namespaces, `auth.*`) are added without touching
/// this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageKind(pub String);

impl MessageKind {
    pub const HANDSHAKE: &'static str = "handshake";
    pub const REQUEST: &'static str = "request";
    pub const RESPONSE: &'static str = "response";
    pub const NOTIFY: &'static str = "notify";
    pub const ERROR: &'static str = "error";
    pub const HEARTBEAT: &'static str = "heartbeat";
    pub const CANCEL: &'static str = "cancel";
    pub const AUTH_PREFIX: &'static str = "auth.";

    pub fn new(kind: impl Into<String>) -> Self {
        MessageKind(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this kind is exempt from authentication middleware: the
    /// `auth.*` namespace itself has to be reachable before a caller holds
    /// a token to authenticate with.
    pub fn is_auth_exempt(&self) -> bool {
        self.0.starts_with(Self::AUTH_PREFIX)
    }
}

impl From<&str> for MessageKind {
    fn from(s: &str) -> Self {
        MessageKind(s.to_owned())
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-message flags: reliability, priority, and fragmentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessageFlags {
    pub reliable: bool,
    pub priority: bool,
    /// Total fragment count, if this message was split; `None` for an
    /// unfragmented message.
    pub fragment_of: Option<u8>,
}

impl MessageFlags {
    pub fn reliable() -> Self {
        MessageFlags {
            reliable: true,
            ..Default::default()
        }
    }
}

/// The typed envelope carried over a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    #[serde(default)]
    pub flags: MessageFlags,
    /// Correlation id, unique within a session for a given direction; lives
    /// until the matching response arrives or a timeout fires.
    #[serde(rename = "cid", skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<u64>,
    #[serde(with = "payload_base64")]
    pub payload: Vec<u8>,
    #[serde(rename = "token", skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl Message {
    pub fn new(kind: impl Into<String>, payload: Vec<u8>) -> Self {
        Message {
            kind: MessageKind::new(kind),
            flags: MessageFlags::default(),
            correlation_id: None,
            payload,
            auth_token: None,
            resource: None,
            action: None,
        }
    }

    pub fn heartbeat() -> Self {
        Message::new(MessageKind::HEARTBEAT, Vec::new())
    }

    pub fn error(code: &str, text: &str, correlation_id: Option<u64>) -> Self {
        let payload = serde_json::to_vec(&serde_json::json!({
            "code": code,
            "message": text,
        }))
        .unwrap_or_default();
        Message {
            kind: MessageKind::new(MessageKind::ERROR),
            flags: MessageFlags::default(),
            correlation_id,
            payload,
            auth_token: None,
            resource: None,
            action: None,
        }
    }

    pub fn with_correlation_id(mut self, cid: u64) -> Self {
        self.correlation_id = Some(cid);
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_resource_action(
        mut self,
        resource: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        self.resource = Some(resource.into());
        self.action = Some(action.into());
        self
    }
}

mod payload_base64 {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        ser.serialize_str(&encoded)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(de)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Generates correlation ids unique within one session, for one direction.
///
/// A monotonic counter gives per-direction uniqueness for free and makes
/// request/response matching trivial to reason about in tests.
#[derive(Debug, Default)]
pub struct CorrelationIdAllocator {
    next: AtomicU64,
}

impl CorrelationIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
