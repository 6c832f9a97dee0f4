//! Stable hashing for enum property values.
//!
//! Enum literals are stored as integers. The hash must never change between
//! releases or process restarts, otherwise stored rows stop decoding, so the
//! algorithm is pinned and versioned.

use sha2::{Digest, Sha256};

/// Identifier of the enum hash algorithm in use.
///
/// `enum-hash-v1`: first eight bytes of SHA-256 over the UTF-8 literal,
/// read big-endian as a signed 64-bit integer.
pub const ENUM_HASH_VERSION: &str = "enum-hash-v1";

/// Hash an enum literal to its stored integer.
pub fn enum_hash(literal: &str) -> i64 {
    let digest = Sha256::digest(literal.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(prefix)
}
