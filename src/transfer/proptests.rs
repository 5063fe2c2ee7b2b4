//! Property-based tests for chunked transfer
//!
//! Tests for:
//! - Roundtrip: split then reassemble returns the blob for any chunk size
//! - Chunking: count and size bounds
//! - Delivery: reordering and duplication do not change the result

use super::{reassemble, split, ChunkAccumulator};
use crate::hash::digest;
use proptest::prelude::*;

proptest! {
    /// Property: reassemble(split(B, S), hash(B)) == B
    #[test]
    fn split_reassemble_roundtrip(
        blob in prop::collection::vec(any::<u8>(), 0..10_000),
        chunk_size in 1usize..2048,
    ) {
        let chunks = split(&blob, chunk_size).unwrap();
        let pairs: Vec<(u32, Vec<u8>)> = chunks
            .iter()
            .map(|c| (c.sequence_number, c.data.clone()))
            .collect();

        prop_assert_eq!(reassemble(&pairs, &digest(&blob)), Some(blob));
    }

    /// Property: every chunk respects the bound and only the last may be short
    #[test]
    fn chunk_sizes_bounded(
        blob in prop::collection::vec(any::<u8>(), 1..10_000),
        chunk_size in 1usize..2048,
    ) {
        let chunks = split(&blob, chunk_size).unwrap();
        let expected = (blob.len() + chunk_size - 1) / chunk_size;
        prop_assert_eq!(chunks.len(), expected);

        for (i, chunk) in chunks.iter().enumerate() {
            prop_assert!(chunk.data.len() <= chunk_size);
            prop_assert_eq!(chunk.sequence_number, i as u32);
            if i + 1 < chunks.len() {
                prop_assert_eq!(chunk.data.len(), chunk_size);
            }
        }
    }

    /// Property: any delivery order with duplicates yields the same blob
    #[test]
    fn reordering_and_duplication_tolerated(
        blob in prop::collection::vec(any::<u8>(), 1..5_000),
        chunk_size in 1usize..600,
        seed in any::<u64>(),
        duplicates in 0usize..20,
    ) {
        use rand::rngs::StdRng;
        use rand::seq::SliceRandom;
        use rand::{Rng, SeedableRng};

        let chunks = split(&blob, chunk_size).unwrap();
        let mut rng = StdRng::seed_from_u64(seed);

        let mut deliveries: Vec<(u32, Vec<u8>)> = chunks
            .iter()
            .map(|c| (c.sequence_number, c.data.clone()))
            .collect();
        for _ in 0..duplicates {
            let pick = rng.gen_range(0..chunks.len());
            deliveries.push((chunks[pick].sequence_number, chunks[pick].data.clone()));
        }
        deliveries.shuffle(&mut rng);

        let hash = digest(&blob);
        let mut accumulator = ChunkAccumulator::new();
        let mut completed = None;
        for (seq, data) in deliveries {
            accumulator.insert(seq, data);
            if let Some(done) = accumulator.try_reassemble(&hash) {
                completed = Some(done);
            }
        }

        prop_assert_eq!(accumulator.len(), chunks.len());
        prop_assert_eq!(completed, Some(blob));
    }

    /// Property: a strict subset of chunks never completes
    #[test]
    fn missing_chunk_never_completes(
        blob in prop::collection::vec(any::<u8>(), 2..5_000),
        chunk_size in 1usize..600,
        drop_index in any::<prop::sample::Index>(),
    ) {
        let chunks = split(&blob, chunk_size).unwrap();
        prop_assume!(chunks.len() > 1);

        let dropped = drop_index.index(chunks.len());
        prop_assume!(!chunks[dropped].data.is_empty());

        let pairs: Vec<(u32, Vec<u8>)> = chunks
            .iter()
            .filter(|c| c.sequence_number as usize != dropped)
            .map(|c| (c.sequence_number, c.data.clone()))
            .collect();

        // The remaining bytes could only collide with a SHA-256 preimage
        prop_assert_eq!(reassemble(&pairs, &digest(&blob)), None);
    }
}
