//! In-memory attestation store.

use super::{AttestationStore, StoreResult, StoredAttestation};
use crate::hash::HashKey;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Attestation store backed by a map; contents are lost on drop.
#[derive(Debug, Clone, Default)]
pub struct MemoryAttestationStore {
    records: Arc<Mutex<BTreeMap<HashKey, StoredAttestation>>>,
}

impl MemoryAttestationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AttestationStore for MemoryAttestationStore {
    async fn get_all(&self) -> StoreResult<Vec<StoredAttestation>> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.values().cloned().collect())
    }

    async fn insert_attestation(
        &self,
        blob: &[u8],
        hash: &HashKey,
        key: &[u8],
        id_format: &str,
    ) -> StoreResult<()> {
        let record = StoredAttestation {
            hash: hash.clone(),
            blob: blob.to_vec(),
            key: key.to_vec(),
            id_format: id_format.to_string(),
        };
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(hash.clone(), record);
        Ok(())
    }

    async fn get_attestation_by_hash(&self, hash: &HashKey) -> StoreResult<Option<Vec<u8>>> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(hash).map(|r| r.blob.clone()))
    }
}
