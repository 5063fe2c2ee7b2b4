//! Content hashes used as map keys and protocol identifiers.
//!
//! Attestation blobs, challenges and transfers are all addressed by the
//! SHA-256 digest of their bytes. Digests travel over the wire as raw byte
//! strings, so the key type wraps an owned `Vec<u8>` and compares by value.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Length of a digest produced by [`digest`].
pub const HASH_LEN: usize = 32;

/// Owned byte-string key with structural equality.
///
/// Any byte sequence received from a peer can be turned into a `HashKey`;
/// the length is not enforced so that lookups with malformed hashes simply
/// miss instead of failing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HashKey(#[serde(with = "serde_bytes")] Vec<u8>);

impl HashKey {
    /// Wrap bytes received from the wire.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    /// Get bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Short hex prefix for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..self.0.len().min(6)])
    }
}

impl From<Vec<u8>> for HashKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// SHA-256 digest of `data`.
pub fn digest(data: &[u8]) -> HashKey {
    HashKey(Sha256::digest(data).to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_digest_is_deterministic() {
        assert_eq!(digest(b"blob"), digest(b"blob"));
        assert_ne!(digest(b"blob"), digest(b"blob2"));
        assert_eq!(digest(b"").as_bytes().len(), HASH_LEN);
    }

    #[test]
    fn test_hash_key_equality_is_structural() {
        let mut map = HashMap::new();
        map.insert(HashKey::from_slice(&[1, 2, 3]), "value");

        // A separately allocated key with the same bytes must hit.
        let lookup = HashKey::from(vec![1, 2, 3]);
        assert_eq!(map.get(&lookup), Some(&"value"));
    }

    #[test]
    fn test_hash_key_display() {
        let key = HashKey::from_slice(&[0xab, 0xcd]);
        assert_eq!(key.to_string(), "abcd");
        assert_eq!(key.short(), "abcd");
        assert_eq!(digest(b"x").short().len(), 12);
    }
}
