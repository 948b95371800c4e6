//! The pluggable encoder interface and a JSON reference implementation.
//!
//! Concrete codecs beyond JSON (MessagePack, a fixed binary layout) are
//! treated as external collaborators — this crate defines the trait seam
//! and ships the one implementation needed to exercise it.

use crate::error::ProtocolError;
use crate::message::Message;

/// Encodes and decodes a [`Message`] to/from bytes.
pub trait Codec: Send + Sync {
    fn encode(&self, message: &Message) -> Result<Vec<u8>, ProtocolError>;
    fn decode(&self, bytes: &[u8]) -> Result<Message, ProtocolError>;
    fn name(&self) -> &'static str;
}

/// JSON codec using the wire keys fixed by [`Message`]'s serde mapping:
/// `kind`, `flags`, `cid`, `token`, `resource`, `action`, `payload`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, message: &Message) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(message)
            .map_err(|e| ProtocolError::Internal(format!("json encode failed: {e}")))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message, ProtocolError> {
        serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::ProtocolViolation(format!("malformed message: {e}")))
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_codec_round_trips_a_message() {
        let codec = JsonCodec;
        let msg = Message::new("request", b"payload".to_vec()).with_correlation_id(1);
        let encoded = codec.encode(&msg).unwrap();
        let decoded = codec.decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn json_codec_rejects_malformed_bytes_as_protocol_violation() {
        let codec = JsonCodec;
        let err = codec.decode(b"{not-json").unwrap_err();
        assert!(matches!(err, ProtocolError::ProtocolViolation(_)));
    }
}
