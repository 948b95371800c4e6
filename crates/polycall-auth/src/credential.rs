//! Credential hashing. Raw credentials are never stored — only a SHA-256
//! hash of them, matching the `credential_reference` field on [`crate::
//! identity::Identity`].

use sha2::{Digest, Sha256};

/// Hash a raw credential for storage as an [`Identity`](crate::identity::Identity)'s
/// `credential_reference`.
pub fn hash(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Whether `raw` hashes to `reference`.
pub fn verify(raw: &str, reference: &str) -> bool {
    hash(raw) == reference
}
