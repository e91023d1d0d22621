//! Shared SHA-256 hex digest utilities.
//!
//! Used for content-addressed artifact storage and for the merge dedup key.

use sha2::{Digest, Sha256};

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Stable dedup key for a `(face, base)` image pair.
///
/// Each input is length-prefixed before hashing so that moving bytes from
/// the end of one input to the start of the other never yields the same key.
pub fn merge_key(face: &[u8], base: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update((face.len() as u64).to_be_bytes());
    hasher.update(face);
    hasher.update((base.len() as u64).to_be_bytes());
    hasher.update(base);
    format!("{:x}", hasher.finalize())
}
