//! Drives the Hello -> Capabilities -> Params exchange that precedes any
//! application traffic, with bit-exact wire structs for interoperability.

use crate::params::{enforce_floor, negotiate, Capabilities, NegotiatedParams, SecurityLevel};
use crate::testing::Clock;
use std::sync::Mutex;
use tracing::{debug, warn};

pub const MAGIC: u32 = 0x5043_4853;
pub const VERSION: u8 = 1;

const HELLO_FLAG_SECURE: u16 = 1 << 0;
const HELLO_FLAG_COMPRESSION: u16 = 1 << 1;
const HELLO_OPT_STREAMING: u8 = 1 << 0;
const HELLO_OPT_FRAGMENTATION: u8 = 1 << 1;

/// The bit-exact Hello message: 15 bytes total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hello {
    pub session_id: u32,
    pub secure: bool,
    pub compression: bool,
    pub streaming: bool,
    pub fragmentation: bool,
}

impl Hello {
    pub fn encode(&self) -> [u8; 15] {
        let mut flags = 0u16;
        if self.secure {
            flags |= HELLO_FLAG_SECURE;
        }
        if self.compression {
            flags |= HELLO_FLAG_COMPRESSION;
        }
        let mut options = 0u8;
        if self.streaming {
            options |= HELLO_OPT_STREAMING;
        }
        if self.fragmentation {
            options |= HELLO_OPT_FRAGMENTATION;
        }

        let mut out = [0u8; 15];
        out[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        out[4] = VERSION;
        out[5..7].copy_from_slice(&flags.to_le_bytes());
        out[7..11].copy_from_slice(&self.session_id.to_le_bytes());
        out[11] = options;
        // out[12..15] reserved, zero
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, HandshakeError> {
        if bytes.len() < 15 {
            return Err(HandshakeError::ProtocolViolation(
                "hello message too short".to_owned(),
            ));
        }
        let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(HandshakeError::InvalidMagic);
        }
        let version = bytes[4];
        if version != VERSION {
            return Err(HandshakeError::VersionMismatch);
        }
        let flags = u16::from_le_bytes(bytes[5..7].try_into().unwrap());
        let session_id = u32::from_le_bytes(bytes[7..11].try_into().unwrap());
        let options = bytes[11];
        Ok(Hello {
            session_id,
            secure: flags & HELLO_FLAG_SECURE != 0,
            compression: flags & HELLO_FLAG_COMPRESSION != 0,
            streaming: options & HELLO_OPT_STREAMING != 0,
            fragmentation: options & HELLO_OPT_FRAGMENTATION != 0,
        })
    }
}

fn encode_capability_bools(compression: bool, encryption: bool, streaming: bool, fragmentation: bool) -> u8 {
    let mut byte = 0u8;
    if compression {
        byte |= 1 << 0;
    }
    if encryption {
        byte |= 1 << 1;
    }
    if streaming {
        byte |= 1 << 2;
    }
    if fragmentation {
        byte |= 1 << 3;
    }
    byte
}

/// Encode a [`Capabilities`] declaration: security level (1), booleans (1),
/// max-message-size (2), heartbeat-interval (2), option-flags (4),
/// supported-features bitmap (16) = 26 bytes.
pub fn encode_capabilities(caps: &Capabilities) -> [u8; 26] {
    let mut out = [0u8; 26];
    out[0] = caps.security_level as u8;
    out[1] = encode_capability_bools(
        caps.compression,
        caps.encryption,
        caps.streaming,
        caps.fragmentation,
    );
    out[2..4].copy_from_slice(&(caps.max_message_size.min(u32::from(u16::MAX)) as u16).to_le_bytes());
    out[4..6].copy_from_slice(&caps.heartbeat_interval.to_le_bytes());
    // out[6..10] option-flags, reserved zero
    out[10..12].copy_from_slice(&caps.supported_features_bitmap().to_le_bytes());
    out
}

pub fn decode_capabilities(bytes: &[u8]) -> Result<Capabilities, HandshakeError> {
    if bytes.len() < 26 {
        return Err(HandshakeError::ProtocolViolation(
            "capabilities message too short".to_owned(),
        ));
    }
    let security_level = SecurityLevel::from_u8(bytes[0])
        .ok_or_else(|| HandshakeError::ProtocolViolation("unknown security level".to_owned()))?;
    let bools = bytes[1];
    let max_message_size = u16::from_le_bytes(bytes[2..4].try_into().unwrap());
    let heartbeat_interval = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
    Ok(Capabilities {
        security_level,
        compression: bools & (1 << 0) != 0,
        encryption: bools & (1 << 1) != 0,
        streaming: bools & (1 << 2) != 0,
        fragmentation: bools & (1 << 3) != 0,
        max_message_size: u32::from(max_message_size),
        heartbeat_interval,
    })
}

/// Encode a [`NegotiatedParams`]: security level (1), booleans (1),
/// max-message-size (2), heartbeat-interval (2), flags (4), selected
/// features (2), reserved (2), extended params (16) = 30 bytes.
pub fn encode_params(params: &NegotiatedParams) -> [u8; 30] {
    let mut out = [0u8; 30];
    out[0] = params.security_level as u8;
    out[1] = encode_capability_bools(
        params.compression,
        params.encryption,
        params.streaming,
        params.fragmentation,
    );
    out[2..4].copy_from_slice(&(params.max_message_size.min(u32::from(u16::MAX)) as u16).to_le_bytes());
    out[4..6].copy_from_slice(&params.heartbeat_interval.to_le_bytes());
    // out[6..10] flags, reserved zero
    out[10..12].copy_from_slice(&params.selected_features_bitmap().to_le_bytes());
    out
}

pub fn decode_params(bytes: &[u8]) -> Result<NegotiatedParams, HandshakeError> {
    if bytes.len() < 30 {
        return Err(HandshakeError::ProtocolViolation(
            "params message too short".to_owned(),
        ));
    }
    let security_level = SecurityLevel::from_u8(bytes[0])
        .ok_or_else(|| HandshakeError::ProtocolViolation("unknown security level".to_owned()))?;
    let bools = bytes[1];
    let max_message_size = u16::from_le_bytes(bytes[2..4].try_into().unwrap());
    let heartbeat_interval = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
    Ok(NegotiatedParams {
        security_level,
        compression: bools & (1 << 0) != 0,
        encryption: bools & (1 << 1) != 0,
        streaming: bools & (1 << 2) != 0,
        fragmentation: bools & (1 << 3) != 0,
        max_message_size: u32::from(max_message_size),
        heartbeat_interval,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeStage {
    Init,
    HelloSent,
    HelloReceived,
    CapabilitiesSent,
    CapabilitiesReceived,
    ParamsSent,
    ParamsReceived,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    InvalidMagic,
    VersionMismatch,
    SessionIdConflict,
    ParameterMismatch,
    ProtocolViolation(String),
    MaxRetries,
    /// The negotiated security level fell below `config.min_security_level`.
    BelowMinimumSecurityLevel,
}

/// How the wait between retries grows with each consumed attempt. Applied
/// on top of `stage_timeout_ms`, not instead of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    #[default]
    None,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Copy)]
pub struct HandshakeConfig {
    pub stage_timeout_ms: u64,
    pub retry_count: u32,
    pub retry_interval_ms: u64,
    pub retry_policy: RetryPolicy,
    /// A floor applied to the negotiated security level on top of what
    /// the two declared capability sets already imply. `SecurityLevel::None`
    /// (the default) enforces nothing beyond the negotiation itself.
    pub min_security_level: SecurityLevel,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        HandshakeConfig {
            stage_timeout_ms: 10_000,
            retry_count: 3,
            retry_interval_ms: 1_000,
            retry_policy: RetryPolicy::None,
            min_security_level: SecurityLevel::None,
        }
    }
}

struct EngineState {
    stage: HandshakeStage,
    session_id: Option<u32>,
    stage_entered_at_ms: u64,
    attempts: u32,
    negotiated: Option<NegotiatedParams>,
}

/// Drives one side of a handshake against a peer. Callers push bytes they
/// receive in through the `on_*` methods and poll [`HandshakeEngine::check_timeout`]
/// periodically (from the reader thread) to apply stage timeouts.
pub struct HandshakeEngine<C: Clock> {
    clock: C,
    config: HandshakeConfig,
    local_capabilities: Capabilities,
    state: Mutex<EngineState>,
}

impl<C: Clock> HandshakeEngine<C> {
    pub fn new(local_capabilities: Capabilities, config: HandshakeConfig, clock: C) -> Self {
        let now = clock.now_ms();
        HandshakeEngine {
            clock,
            config,
            local_capabilities,
            state: Mutex::new(EngineState {
                stage: HandshakeStage::Init,
                session_id: None,
                stage_entered_at_ms: now,
                attempts: 0,
                negotiated: None,
            }),
        }
    }

    pub fn stage(&self) -> HandshakeStage {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).stage.clone()
    }

    pub fn negotiated(&self) -> Option<NegotiatedParams> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).negotiated
    }

    fn enter_stage(state: &mut EngineState, stage: HandshakeStage, now_ms: u64) {
        debug!(stage = ?stage, "handshake entering stage");
        state.stage = stage;
        state.stage_entered_at_ms = now_ms;
        state.attempts = 0;
    }

    fn fail(state: &mut EngineState) {
        warn!(stage = ?state.stage, "handshake failed");
        state.stage = HandshakeStage::Failed;
    }

    /// Build and mark-sent the first Hello for `session_id`.
    pub fn send_hello(&self, session_id: u32) -> Result<Hello, HandshakeError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.stage != HandshakeStage::Init {
            return Err(HandshakeError::ProtocolViolation(format!(
                "cannot send hello from stage {:?}",
                state.stage
            )));
        }
        state.session_id = Some(session_id);
        let now = self.clock.now_ms();
        Self::enter_stage(&mut state, HandshakeStage::HelloSent, now);
        Ok(Hello {
            session_id,
            secure: self.local_capabilities.security_level > SecurityLevel::None,
            compression: self.local_capabilities.compression,
            streaming: self.local_capabilities.streaming,
            fragmentation: self.local_capabilities.fragmentation,
        })
    }

    /// Process a Hello received from the peer.
    pub fn on_hello(&self, bytes: &[u8]) -> Result<(), HandshakeError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !matches!(
            state.stage,
            HandshakeStage::Init | HandshakeStage::HelloSent
        ) {
            return Err(HandshakeError::ProtocolViolation(format!(
                "hello not expected in stage {:?}",
                state.stage
            )));
        }
        let hello = match Hello::decode(bytes) {
            Ok(h) => h,
            Err(e) => {
                Self::fail(&mut state);
                return Err(e);
            }
        };
        match state.session_id {
            Some(existing) if existing != hello.session_id => {
                Self::fail(&mut state);
                return Err(HandshakeError::SessionIdConflict);
            }
            None => state.session_id = Some(hello.session_id),
            _ => {}
        }
        let now = self.clock.now_ms();
        Self::enter_stage(&mut state, HandshakeStage::HelloReceived, now);
        Ok(())
    }

    /// Build this side's Capabilities message.
    pub fn send_capabilities(&self) -> Result<Capabilities, HandshakeError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.stage != HandshakeStage::HelloReceived {
            return Err(HandshakeError::ProtocolViolation(format!(
                "cannot send capabilities from stage {:?}",
                state.stage
            )));
        }
        let now = self.clock.now_ms();
        Self::enter_stage(&mut state, HandshakeStage::CapabilitiesSent, now);
        Ok(self.local_capabilities)
    }

    /// Process the peer's Capabilities and negotiate.
    pub fn on_capabilities(&self, bytes: &[u8]) -> Result<NegotiatedParams, HandshakeError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.stage != HandshakeStage::CapabilitiesSent {
            return Err(HandshakeError::ProtocolViolation(format!(
                "capabilities not expected in stage {:?}",
                state.stage
            )));
        }
        let remote = match decode_capabilities(bytes) {
            Ok(c) => c,
            Err(e) => {
                Self::fail(&mut state);
                return Err(e);
            }
        };
        let negotiated = negotiate(self.local_capabilities, remote);
        if enforce_floor(&negotiated, self.config.min_security_level).is_err() {
            Self::fail(&mut state);
            return Err(HandshakeError::BelowMinimumSecurityLevel);
        }
        state.negotiated = Some(negotiated);
        let now = self.clock.now_ms();
        Self::enter_stage(&mut state, HandshakeStage::CapabilitiesReceived, now);
        Ok(negotiated)
    }

    /// Mark the locally computed Params as sent.
    pub fn send_params(&self) -> Result<NegotiatedParams, HandshakeError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.stage != HandshakeStage::CapabilitiesReceived {
            return Err(HandshakeError::ProtocolViolation(format!(
                "cannot send params from stage {:?}",
                state.stage
            )));
        }
        let negotiated = state
            .negotiated
            .ok_or_else(|| HandshakeError::ProtocolViolation("no negotiated params yet".to_owned()))?;
        let now = self.clock.now_ms();
        Self::enter_stage(&mut state, HandshakeStage::ParamsSent, now);
        Ok(negotiated)
    }

    /// Process the peer's echoed-back Params and confirm they match ours.
    pub fn on_params(&self, bytes: &[u8]) -> Result<NegotiatedParams, HandshakeError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.stage != HandshakeStage::ParamsSent {
            return Err(HandshakeError::ProtocolViolation(format!(
                "params not expected in stage {:?}",
                state.stage
            )));
        }
        let remote_params = match decode_params(bytes) {
            Ok(p) => p,
            Err(e) => {
                Self::fail(&mut state);
                return Err(e);
            }
        };
        let ours = state.negotiated;
        if ours != Some(remote_params) {
            Self::fail(&mut state);
            return Err(HandshakeError::ParameterMismatch);
        }
        let now = self.clock.now_ms();
        Self::enter_stage(&mut state, HandshakeStage::ParamsReceived, now);
        state.stage = HandshakeStage::Complete;
        Ok(remote_params)
    }

    /// Extra wait layered on top of `stage_timeout_ms` before attempt
    /// `attempts` is allowed to retry, per `retry_policy`.
    fn backoff_ms(&self, attempts: u32) -> u64 {
        match self.config.retry_policy {
            RetryPolicy::None => 0,
            RetryPolicy::Linear => self.config.retry_interval_ms.saturating_mul(u64::from(attempts)),
            RetryPolicy::Exponential => {
                let shift = attempts.min(32);
                self.config.retry_interval_ms.saturating_mul(1u64 << shift)
            }
        }
    }

    /// Apply stage-timeout and retry-budget policy. Returns `true` if the
    /// current stage just failed with `MaxRetries`; the caller should
    /// resend the current stage's message (if `false` and a retry was
    /// consumed) or treat the handshake as failed (if `true`).
    pub fn check_timeout(&self) -> Result<bool, HandshakeError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(
            state.stage,
            HandshakeStage::Complete | HandshakeStage::Failed | HandshakeStage::Init
        ) {
            return Ok(false);
        }
        let now = self.clock.now_ms();
        let threshold = self.config.stage_timeout_ms.saturating_add(self.backoff_ms(state.attempts));
        if now.saturating_sub(state.stage_entered_at_ms) < threshold {
            return Ok(false);
        }
        if state.attempts >= self.config.retry_count {
            Self::fail(&mut state);
            return Err(HandshakeError::MaxRetries);
        }
        state.attempts += 1;
        state.stage_entered_at_ms = now;
        Ok(true)
    }
}
