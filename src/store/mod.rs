//! Persistent attestation storage.
//!
//! The subject keeps every attestation it was issued together with the
//! secret key the attestation is bound to, addressed by the content hash of
//! the blob. A prover answers verification requests only for hashes it
//! finds here.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryAttestationStore;
pub use sqlite::SqliteAttestationStore;

use crate::hash::HashKey;
use async_trait::async_trait;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Attestation store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// One stored attestation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAttestation {
    pub hash: HashKey,
    pub blob: Vec<u8>,
    /// Serialized secret key the attestation is bound to
    pub key: Vec<u8>,
    pub id_format: String,
}

/// Storage boundary for issued attestations.
#[async_trait]
pub trait AttestationStore: Send + Sync {
    /// All stored attestations, ordered by hash.
    async fn get_all(&self) -> StoreResult<Vec<StoredAttestation>>;

    /// Store an attestation; an existing hash is overwritten.
    async fn insert_attestation(
        &self,
        blob: &[u8],
        hash: &HashKey,
        key: &[u8],
        id_format: &str,
    ) -> StoreResult<()>;

    /// Blob stored under `hash`.
    async fn get_attestation_by_hash(&self, hash: &HashKey) -> StoreResult<Option<Vec<u8>>>;
}
