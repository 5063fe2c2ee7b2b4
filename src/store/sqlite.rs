//! SQLite attestation store (sqlx).
//!
//! ## Schema
//!
//! One table, `attestations`, keyed by the blob's content hash. The secret
//! key column holds the algorithm's serialized key as-is.

use super::{AttestationStore, StoreResult, StoredAttestation};
use crate::hash::HashKey;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS attestations (
    hash BLOB PRIMARY KEY NOT NULL,
    blob BLOB NOT NULL,
    key BLOB NOT NULL,
    id_format TEXT NOT NULL
)";

/// Attestation store in a SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteAttestationStore {
    pool: SqlitePool,
}

impl SqliteAttestationStore {
    /// Open (creating if needed) the database at `path`.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    /// Private in-memory database (one connection so every query sees it).
    pub async fn in_memory() -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> StoreResult<Self> {
        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl AttestationStore for SqliteAttestationStore {
    async fn get_all(&self) -> StoreResult<Vec<StoredAttestation>> {
        let rows = sqlx::query_as::<_, (Vec<u8>, Vec<u8>, Vec<u8>, String)>(
            "SELECT hash, blob, key, id_format FROM attestations ORDER BY hash",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(hash, blob, key, id_format)| StoredAttestation {
                hash: HashKey::from(hash),
                blob,
                key,
                id_format,
            })
            .collect())
    }

    async fn insert_attestation(
        &self,
        blob: &[u8],
        hash: &HashKey,
        key: &[u8],
        id_format: &str,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO attestations (hash, blob, key, id_format) VALUES (?, ?, ?, ?)",
        )
        .bind(hash.as_bytes())
        .bind(blob)
        .bind(key)
        .bind(id_format)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_attestation_by_hash(&self, hash: &HashKey) -> StoreResult<Option<Vec<u8>>> {
        let row = sqlx::query_as::<_, (Vec<u8>,)>("SELECT blob FROM attestations WHERE hash = ?")
            .bind(hash.as_bytes())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(blob,)| blob))
    }
}
