//! Chunked transfer of attestation blobs.
//!
//! Blobs are larger than a safe datagram, so they travel as a sequence of
//! ATTESTATION messages. Each chunk carries the digest of the *whole* blob
//! rather than of the chunk: the receiver keeps appending chunks to the
//! session that owns the transfer and checks after every chunk whether the
//! ordered concatenation hashes to the declared value. There is no
//! final-length field.
//!
//! ## Design
//!
//! - **Chunk Size**: 800 bytes by default, never above [`MAX_CHUNK_SIZE`]
//! - **Ordering**: chunks are 0-indexed in send order; reassembly sorts
//! - **Retransmission**: a repeated index overwrites the previous data
//! - **Integrity**: a digest mismatch means "incomplete", not "corrupt"

use crate::hash::{digest, HashKey};
use std::collections::BTreeMap;
use thiserror::Error;

#[cfg(test)]
mod proptests;

/// Default chunk size in bytes.
pub const CHUNK_SIZE: usize = 800;

/// Largest chunk that still fits a datagram together with its envelope.
pub const MAX_CHUNK_SIZE: usize = 1200;

/// Upper bound on distinct indices accepted for one transfer.
pub const MAX_CHUNKS_PER_TRANSFER: usize = 4096;

/// One piece of a blob in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Digest of the complete blob this chunk belongs to
    pub hash: HashKey,

    /// Position in send order (0-based)
    pub sequence_number: u32,

    /// Chunk bytes (`max_chunk_size` at most, last chunk may be smaller)
    pub data: Vec<u8>,
}

/// Errors that can occur during chunk operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransferError {
    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(usize),

    #[error("Blob too large: {chunks} chunks exceeds maximum {max}")]
    TooManyChunks { chunks: usize, max: usize },
}

/// Split a blob into chunks for sending.
///
/// An empty blob still produces one (empty) chunk so that the receiving
/// side sees a message whose digest matches and can complete.
pub fn split(blob: &[u8], max_chunk_size: usize) -> Result<Vec<Chunk>, TransferError> {
    if max_chunk_size == 0 {
        return Err(TransferError::InvalidChunkSize(max_chunk_size));
    }

    let num_chunks = blob.len().div_ceil(max_chunk_size).max(1);
    if num_chunks > MAX_CHUNKS_PER_TRANSFER {
        return Err(TransferError::TooManyChunks {
            chunks: num_chunks,
            max: MAX_CHUNKS_PER_TRANSFER,
        });
    }

    let hash = digest(blob);
    if blob.is_empty() {
        return Ok(vec![Chunk {
            hash,
            sequence_number: 0,
            data: Vec::new(),
        }]);
    }

    Ok(blob
        .chunks(max_chunk_size)
        .enumerate()
        .map(|(index, data)| Chunk {
            hash: hash.clone(),
            sequence_number: index as u32,
            data: data.to_vec(),
        })
        .collect())
}

/// Reassemble received `(sequence_number, data)` pairs.
///
/// Returns `None` while the transfer is incomplete.
pub fn reassemble(received: &[(u32, Vec<u8>)], declared_hash: &HashKey) -> Option<Vec<u8>> {
    let mut accumulator = ChunkAccumulator::new();
    for (sequence_number, data) in received {
        accumulator.insert(*sequence_number, data.clone());
    }
    accumulator.try_reassemble(declared_hash)
}

/// Outcome of adding a chunk to an accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepted {
    /// New index stored
    New,
    /// Index already present, data replaced
    Replaced,
    /// Transfer already holds [`MAX_CHUNKS_PER_TRANSFER`] indices
    Rejected,
}

/// Chunks received so far for one logical transfer.
///
/// Lives inside the session record that owns the transfer; the correlation
/// store is the only place partial transfers are kept.
#[derive(Debug, Clone, Default)]
pub struct ChunkAccumulator {
    chunks: BTreeMap<u32, Vec<u8>>,
}

impl ChunkAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a chunk; a repeated index overwrites (last write wins).
    pub fn insert(&mut self, sequence_number: u32, data: Vec<u8>) -> Accepted {
        if let Some(existing) = self.chunks.get_mut(&sequence_number) {
            *existing = data;
            return Accepted::Replaced;
        }
        if self.chunks.len() >= MAX_CHUNKS_PER_TRANSFER {
            return Accepted::Rejected;
        }
        self.chunks.insert(sequence_number, data);
        Accepted::New
    }

    /// Concatenate in index order and compare against the declared digest.
    pub fn try_reassemble(&self, declared_hash: &HashKey) -> Option<Vec<u8>> {
        let total: usize = self.chunks.values().map(Vec::len).sum();
        let mut serialized = Vec::with_capacity(total);
        for data in self.chunks.values() {
            serialized.extend_from_slice(data);
        }

        if digest(&serialized) == *declared_hash {
            Some(serialized)
        } else {
            None
        }
    }

    /// Number of distinct indices received.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
