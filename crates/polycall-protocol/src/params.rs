//! Capability declarations and the negotiation that turns two of them into
//! one agreed-upon parameter set.

use serde::{Deserialize, Serialize};

/// The minimum security posture a side will accept or declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum SecurityLevel {
    None = 0,
    Low = 1,
    Medium = 2,
    High = 3,
}

impl SecurityLevel {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(SecurityLevel::None),
            1 => Some(SecurityLevel::Low),
            2 => Some(SecurityLevel::Medium),
            3 => Some(SecurityLevel::High),
            _ => None,
        }
    }
}

/// What one side declares it can do and will accept. The wire Capabilities
/// struct carries a single security-level byte, so that one field does
/// double duty here: it is this side's offer and its floor at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub security_level: SecurityLevel,
    pub compression: bool,
    pub encryption: bool,
    pub streaming: bool,
    pub fragmentation: bool,
    /// Bytes. Note the wire Capabilities struct's `max-message-size` field
    /// is a uint16; values above `u16::MAX` are clamped to it when encoded.
    pub max_message_size: u32,
    pub heartbeat_interval: u16,
}

impl Capabilities {
    /// bit0=security bit1=compression bit2=encryption bit3=streaming
    /// bit4=fragmentation, matching the Hello/Capabilities/Params wire
    /// bitmap layout.
    pub fn supported_features_bitmap(&self) -> u16 {
        let mut bits = 0u16;
        if self.security_level > SecurityLevel::None {
            bits |= 1 << 0;
        }
        if self.compression {
            bits |= 1 << 1;
        }
        if self.encryption {
            bits |= 1 << 2;
        }
        if self.streaming {
            bits |= 1 << 3;
        }
        if self.fragmentation {
            bits |= 1 << 4;
        }
        bits
    }
}

/// The result of negotiating two [`Capabilities`] declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiatedParams {
    pub security_level: SecurityLevel,
    pub compression: bool,
    pub encryption: bool,
    pub streaming: bool,
    pub fragmentation: bool,
    pub max_message_size: u32,
    pub heartbeat_interval: u16,
}

impl NegotiatedParams {
    pub fn selected_features_bitmap(&self) -> u16 {
        let mut bits = 0u16;
        if self.security_level > SecurityLevel::None {
            bits |= 1 << 0;
        }
        if self.compression {
            bits |= 1 << 1;
        }
        if self.encryption {
            bits |= 1 << 2;
        }
        if self.streaming {
            bits |= 1 << 3;
        }
        if self.fragmentation {
            bits |= 1 << 4;
        }
        bits
    }
}

/// Why negotiation between two capability sets failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    /// The agreed level is below a floor supplied separately from the
    /// capability exchange itself (see [`enforce_floor`]).
    BelowMinimumSecurityLevel,
}

/// Combine two declared capability sets into the parameters both sides
/// must then use: booleans AND together, numeric limits take the minimum,
/// and the security level is the minimum of the two declared levels.
pub fn negotiate(local: Capabilities, remote: Capabilities) -> NegotiatedParams {
    NegotiatedParams {
        security_level: local.security_level.min(remote.security_level),
        compression: local.compression && remote.compression,
        encryption: local.encryption && remote.encryption,
        streaming: local.streaming && remote.streaming,
        fragmentation: local.fragmentation && remote.fragmentation,
        max_message_size: local.max_message_size.min(remote.max_message_size),
        heartbeat_interval: local.heartbeat_interval.min(remote.heartbeat_interval),
    }
}

/// Reject a negotiated result that falls below a locally configured floor.
/// The capability exchange itself carries only one security-level field
/// per side, so a stricter floor (if a deployment wants one) is a local
/// policy applied after negotiation, not part of the wire exchange.
pub fn enforce_floor(
    negotiated: &NegotiatedParams,
    floor: SecurityLevel,
) -> Result<(), NegotiationError> {
    if negotiated.security_level < floor {
        return Err(NegotiationError::BelowMinimumSecurityLevel);
    }
    Ok(())
}
