//! Content hashing.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// SHA-256 of a byte slice as lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Serialize a value with object keys sorted and no insignificant whitespace.
///
/// `serde_json::Map` is a `BTreeMap` unless the `preserve_order` feature is
/// enabled, so compact serialization is already key-sorted.
pub fn canonical_json(value: &Value) -> String {
    value.to_string()
}

/// Checksum of a configuration tree.
pub fn checksum(value: &Value) -> String {
    sha256_hex(canonical_json(value).as_bytes())
}
