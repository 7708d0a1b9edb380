//! Deterministic canonical encoding.
//!
//! Both the manifest signer and the simulator digest hash the same
//! encoding: compact JSON with object keys sorted at every nesting depth.
//! Re-encoding through `serde_json::Value` gives the recursive sort for
//! free, since its map type is BTree-backed, and number formatting is the
//! shortest round-trip form on every architecture.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Canonical compact serialization of any serializable value.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let tree: Value = serde_json::to_value(value)?;
    serde_json::to_string(&tree)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-256 hex digest of the canonical encoding.
pub fn canonical_digest<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(sha256_hex(canonical_json(value)?.as_bytes()))
}
