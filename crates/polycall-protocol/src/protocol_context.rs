//! Owns the state machine, codec, transport, and the handler/middleware
//! chain that inbound and outbound messages flow through.

use crate::codec::Codec;
use crate::error::{PeerVisibleError, ProtocolError};
use crate::message::{CorrelationIdAllocator, Message, MessageKind};
use crate::state_machine::StateMachine;
use crate::transport::Transport;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// What a middleware decides about one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiddlewareDecision {
    Allow,
    Deny(String),
}

/// Runs ahead of handler dispatch. Any middleware returning `Deny` aborts
/// dispatch; the caller gets an access-denied response instead.
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, ctx: &ProtocolContext, message: &Message) -> MiddlewareDecision;
}

/// `(ctx, request) -> response | error`.
pub type Handler = Box<dyn Fn(&ProtocolContext, &Message) -> Result<Message, ProtocolError> + Send + Sync>;

struct Registries {
    handlers: HashMap<String, Handler>,
    middlewares: Vec<Arc<dyn Middleware>>,
}

/// The session's central dispatcher: state machine, codec, transport, and
/// the handler/middleware chain inbound and outbound messages pass through.
pub struct ProtocolContext {
    pub state_machine: StateMachine,
    codec: Box<dyn Codec>,
    transport: Arc<dyn Transport>,
    registries: Mutex<Registries>,
    correlation_ids: CorrelationIdAllocator,
}

impl ProtocolContext {
    pub fn new(codec: Box<dyn Codec>, transport: Arc<dyn Transport>, state_machine: StateMachine) -> Self {
        ProtocolContext {
            state_machine,
            codec,
            transport,
            registries: Mutex::new(Registries {
                handlers: HashMap::new(),
                middlewares: Vec::new(),
            }),
            correlation_ids: CorrelationIdAllocator::new(),
        }
    }

    /// Register (or idempotently replace) the handler for a message kind.
    pub fn register_handler(&self, kind: impl Into<String>, handler: Handler) {
        self.registries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .handlers
            .insert(kind.into(), handler);
    }

    /// Middlewares run in registration order.
    pub fn register_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.registries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .middlewares
            .push(middleware);
    }

    /// Decode one inbound frame, run the middleware chain, dispatch to the
    /// registered handler, and return the response (if any) ready to send
    /// back. A decode failure is reported as a peer-visible Error message
    /// with no handler dispatch attempted; the session is expected to
    /// collapse to `error` by the caller.
    pub fn handle_inbound(&self, frame: &[u8]) -> Result<Option<Message>, PeerVisibleError> {
        let message = self.codec.decode(frame).map_err(|e| {
            warn!(error = %e, "failed to decode inbound frame");
            let _ = self.state_machine.fire("fault");
            PeerVisibleError::from_error(&e, None)
        })?;
        debug!(kind = %message.kind, cid = ?message.correlation_id, "dispatching inbound message");

        let registries = self.registries.lock().unwrap_or_else(|e| e.into_inner());
        for middleware in registries.middlewares.iter() {
            if let MiddlewareDecision::Deny(reason) = middleware.check(self, &message) {
                debug!(middleware = middleware.name(), reason = %reason, "middleware denied message");
                let denied = ProtocolError::AccessDenied(reason);
                return Ok(Some(Message::error(
                    denied.code(),
                    &denied.to_string(),
                    message.correlation_id,
                )));
            }
        }

        let handler = registries.handlers.get(message.kind.as_str());
        let Some(handler) = handler else {
            return Ok(Some(Message::error(
                "UNSUPPORTED",
                &format!("no handler registered for kind {}", message.kind),
                message.correlation_id,
            )));
        };

        match handler(self, &message) {
            Ok(response) => Ok(Some(response)),
            Err(err) => Ok(Some(Message::error(
                err.code(),
                &err.to_string(),
                message.correlation_id,
            ))),
        }
    }

    /// Assign a correlation id to a request-kind message (if it doesn't
    /// already carry one), encode it, and write it to the transport.
    pub fn send(&self, mut message: Message) -> Result<(), ProtocolError> {
        if message.kind.as_str() == MessageKind::REQUEST && message.correlation_id.is_none() {
            message.correlation_id = Some(self.correlation_ids.allocate());
        }
        let encoded = self.codec.encode(&message)?;
        self.transport.send(&encoded)
    }
}
