//! CBOR serialization for wire payloads and attestation blobs.
//!
//! - Use CBOR via `ciborium` (NOT JSON or bincode)
//! - Deterministic serialization, so re-serializing a decoded blob
//!   reproduces the bytes it was hashed from

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Serialization errors.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// CBOR encoding failed.
    #[error("CBOR encoding failed: {0}")]
    Encode(String),

    /// CBOR decoding failed.
    #[error("CBOR decoding failed: {0}")]
    Decode(String),
}

/// Encode a payload or blob as CBOR.
pub fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, SerializationError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| SerializationError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Decode CBOR bytes into `T`; trailing garbage is not checked.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, SerializationError> {
    ciborium::from_reader(bytes).map_err(|e| SerializationError::Decode(e.to_string()))
}
