//! The top-level façade a caller drives end-to-end: one [`ProtocolContext`],
//! one [`HandshakeEngine`], and the shared [`Integrator`] wired together as a
//! single constructible type instead of prose about how C1-C13 connect.

use crate::integrator::{register_auth_handlers, Integrator};
use polycall_protocol::handshake::{encode_capabilities, encode_params};
use polycall_protocol::testing::Clock;
use polycall_protocol::{
    Capabilities, Codec, DuplexStream, HandshakeConfig, HandshakeEngine, HandshakeError, Message,
    NegotiatedParams, ProtocolContext, ProtocolError, StateMachine, StreamConfig, Transport,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn handshake_err_to_protocol(err: HandshakeError) -> ProtocolError {
    match err {
        HandshakeError::VersionMismatch => {
            ProtocolError::ProtocolViolation("handshake version mismatch".to_owned())
        }
        HandshakeError::SessionIdConflict => {
            ProtocolError::ProtocolViolation("conflicting session id".to_owned())
        }
        HandshakeError::ParameterMismatch => {
            ProtocolError::ProtocolViolation("negotiated params did not match".to_owned())
        }
        HandshakeError::MaxRetries => {
            ProtocolError::Timeout("handshake stage exceeded its retry budget".to_owned())
        }
        HandshakeError::BelowMinimumSecurityLevel => {
            ProtocolError::AccessDenied("negotiated security level below configured floor".to_owned())
        }
        HandshakeError::InvalidMagic | HandshakeError::ProtocolViolation(_) => {
            ProtocolError::ProtocolViolation(format!("{err:?}"))
        }
    }
}

/// One side of a session: the dispatcher, the handshake engine, the shared
/// zero-trust integrator, and the duplex streams opened on top of it.
///
/// Callers drive it through five operations: [`Session::perform_handshake`],
/// [`Session::mark_authenticated`], [`Session::send`],
/// [`Session::dispatch_inbound`], and [`Session::open_stream`].
pub struct Session {
    pub context: ProtocolContext,
    pub integrator: Arc<Integrator>,
    pub handshake: HandshakeEngine<Arc<dyn Clock>>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    streams: Mutex<Vec<Arc<DuplexStream>>>,
}

impl Session {
    /// `recovery_enabled` governs whether the session's state machine
    /// legalizes `error -> ready` (see spec's recovery Open Question,
    /// recorded in DESIGN.md); most deployments leave this `false` and treat
    /// `error` as terminal like `closed`.
    pub fn new(
        transport: Arc<dyn Transport>,
        codec: Box<dyn Codec>,
        local_capabilities: Capabilities,
        handshake_config: HandshakeConfig,
        clock: Arc<dyn Clock>,
        integrator: Arc<Integrator>,
        recovery_enabled: bool,
    ) -> Self {
        let mut state_machine = StateMachine::new("handshake", recovery_enabled);
        state_machine.add_transition("handshake", "complete", "ready", None, None);
        state_machine.add_transition("handshake", "fault", "error", None, None);
        state_machine.add_transition("ready", "authenticate", "authenticated", None, None);
        state_machine.add_transition("ready", "fault", "error", None, None);
        state_machine.add_transition("ready", "close", "closed", None, None);
        state_machine.add_transition("authenticated", "fault", "error", None, None);
        state_machine.add_transition("authenticated", "close", "closed", None, None);
        state_machine.add_transition("error", "close", "closed", None, None);
        if recovery_enabled {
            state_machine.add_transition("error", "recover", "ready", None, None);
        }

        let handshake = HandshakeEngine::new(local_capabilities, handshake_config, clock.clone());
        let context = ProtocolContext::new(codec, transport.clone(), state_machine);
        context.register_middleware(integrator.clone());
        register_auth_handlers(&context, integrator.clone());

        Session {
            context,
            integrator,
            handshake,
            transport,
            clock,
            streams: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> String {
        self.context.state_machine.current()
    }

    /// Block (polling the transport, not spinning the CPU) until a frame of
    /// at least one byte arrives, applying the handshake engine's stage
    /// timeout and retry budget while waiting.
    fn recv_frame_blocking(&self) -> Result<Vec<u8>, ProtocolError> {
        loop {
            if let Some(frame) = self.transport.recv()? {
                return Ok(frame);
            }
            match self.handshake.check_timeout() {
                Ok(_) => {}
                Err(err) => return Err(handshake_err_to_protocol(err)),
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    pub fn send_hello(&self, session_id: u32) -> Result<(), ProtocolError> {
        let hello = self
            .handshake
            .send_hello(session_id)
            .map_err(handshake_err_to_protocol)?;
        self.transport.send(&hello.encode())
    }

    pub fn recv_hello(&self) -> Result<(), ProtocolError> {
        let frame = self.recv_frame_blocking()?;
        self.handshake.on_hello(&frame).map_err(handshake_err_to_protocol)
    }

    pub fn send_capabilities(&self) -> Result<(), ProtocolError> {
        let caps = self.handshake.send_capabilities().map_err(handshake_err_to_protocol)?;
        self.transport.send(&encode_capabilities(&caps))
    }

    pub fn recv_capabilities(&self) -> Result<NegotiatedParams, ProtocolError> {
        let frame = self.recv_frame_blocking()?;
        self.handshake
            .on_capabilities(&frame)
            .map_err(handshake_err_to_protocol)
    }

    pub fn send_params(&self) -> Result<(), ProtocolError> {
        let params = self.handshake.send_params().map_err(handshake_err_to_protocol)?;
        self.transport.send(&encode_params(&params))
    }

    pub fn recv_params(&self) -> Result<NegotiatedParams, ProtocolError> {
        let frame = self.recv_frame_blocking()?;
        self.handshake.on_params(&frame).map_err(handshake_err_to_protocol)
    }

    /// Drive the whole Hello -> Capabilities -> Params exchange for this
    /// side, in the one order each stage actually requires (see
    /// [`HandshakeEngine`]), and move the session's state machine from
    /// `handshake` to `ready` once it completes.
    pub fn perform_handshake(&self, session_id: u32) -> Result<NegotiatedParams, ProtocolError> {
        self.send_hello(session_id)?;
        self.recv_hello()?;
        self.send_capabilities()?;
        let _ = self.recv_capabilities()?;
        self.send_params()?;
        let negotiated = self.recv_params()?;
        self.context.state_machine.fire("complete")?;
        Ok(negotiated)
    }

    /// Move `ready -> authenticated`. Callers invoke this once an `auth.*`
    /// exchange (login, or a refreshed/validated token) has succeeded; the
    /// integrator itself only decides per-message authorization, it does not
    /// own this session-level transition.
    pub fn mark_authenticated(&self) -> Result<(), ProtocolError> {
        self.context.state_machine.fire("authenticate")?;
        Ok(())
    }

    pub fn dispatch_inbound(&self, frame: &[u8]) -> Result<Option<Message>, ProtocolError> {
        self.context
            .handle_inbound(frame)
            .map_err(|e| ProtocolError::ProtocolViolation(e.to_string()))
    }

    pub fn send(&self, message: Message) -> Result<(), ProtocolError> {
        self.context.send(message)
    }

    /// The symmetric hook for external command dispatchers, see
    /// [`Integrator::check_command`].
    pub fn check_command(&self, dispatcher: &str, command: &str, token: &str) -> Result<String, ProtocolError> {
        self.integrator.check_command(dispatcher, command, token)
    }

    /// Open a new duplex stream sharing this session's clock.
    pub fn open_stream(&self, config: StreamConfig) -> Arc<DuplexStream> {
        let clock = self.clock.clone();
        let stream = Arc::new(DuplexStream::with_clock(config, Arc::new(move || clock.now_ms())));
        self.streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(stream.clone());
        stream
    }

    /// Close every stream opened on this session, tear down the transport,
    /// and move the state machine to `closed`. Idempotent.
    pub fn close(&self) -> Result<(), ProtocolError> {
        for stream in self.streams.lock().unwrap_or_else(|e| e.into_inner()).drain(..) {
            stream.close();
        }
        self.transport.close();
        if self.context.state_machine.current() == "closed" {
            return Ok(());
        }
        self.context.state_machine.fire("close")?;
        Ok(())
    }
}
