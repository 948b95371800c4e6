//! Bit-exact wire framing.
//!
//! Every message on the transport is a 4-byte little-endian length `L`
//! (excluding the length field itself) followed by `L` bytes of
//! codec-encoded payload. When fragmentation is negotiated, a 1-byte
//! fragment header precedes the payload: bit7 = more-fragments, the low
//! bits carry the fragment index.

use crate::error::ProtocolError;

const LENGTH_PREFIX_SIZE: usize = 4;

/// Prepend the 4-byte little-endian length prefix to `payload`.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    framed.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    framed.extend_from_slice(payload);
    framed
}

/// Attempt to decode one length-prefixed frame from the front of `buf`.
///
/// Returns `Ok(Some((payload, consumed)))` when a full frame is present,
/// `Ok(None)` when more bytes are needed, and an error when the declared
/// length is malformed.
pub fn decode_frame(buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&buf[..LENGTH_PREFIX_SIZE]);
    let len = u32::from_le_bytes(len_bytes) as usize;
    let total = LENGTH_PREFIX_SIZE + len;
    if buf.len() < total {
        return Ok(None);
    }
    Ok(Some((buf[LENGTH_PREFIX_SIZE..total].to_vec(), total)))
}

/// The 1-byte per-fragment header: bit7 = more fragments follow, low 7
/// bits = this fragment's index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub more_fragments: bool,
    pub index: u8,
}

const MORE_FRAGMENTS_BIT: u8 = 0b1000_0000;
const INDEX_MASK: u8 = 0b0111_1111;

impl FragmentHeader {
    pub fn encode(self) -> u8 {
        let mut byte = self.index & INDEX_MASK;
        if self.more_fragments {
            byte |= MORE_FRAGMENTS_BIT;
        }
        byte
    }

    pub fn decode(byte: u8) -> Self {
        FragmentHeader {
            more_fragments: byte & MORE_FRAGMENTS_BIT != 0,
            index: byte & INDEX_MASK,
        }
    }
}
