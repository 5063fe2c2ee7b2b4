//! Chunk streaming shared by issuance and verification.

use super::{AttestationCommunity, CommunityError};
use crate::cache::{ReceivingForVerification, Session};
use crate::hash::HashKey;
use crate::transfer::{split, Accepted, ChunkAccumulator};
use crate::transport::Peer;
use crate::wire::{AttestationChunkPayload, MessageId};
use std::net::SocketAddr;
use tracing::{debug, info, warn};

impl AttestationCommunity {
    /// Stream `blob` to `address` as ATTESTATION chunks stamped `global_time`.
    pub(super) fn send_attestation(
        &self,
        address: SocketAddr,
        blob: &[u8],
        global_time: u64,
    ) -> Result<usize, CommunityError> {
        let chunks = split(blob, self.config.chunk_size)?;
        let count = chunks.len();
        for chunk in chunks {
            debug!(
                to = %address,
                sequence_number = chunk.sequence_number,
                size = chunk.data.len(),
                "Sending attestation chunk"
            );
            self.send_message(
                address,
                MessageId::Attestation,
                global_time,
                &AttestationChunkPayload {
                    hash: chunk.hash,
                    sequence_number: chunk.sequence_number,
                    data: chunk.data,
                },
            )?;
        }
        info!(to = %address, chunks = count, size = blob.len(), "Sent attestation");
        Ok(count)
    }

    /// Route a chunk to the transfer it belongs to.
    ///
    /// A pending verification for the hash takes precedence over issuance.
    pub(super) async fn on_attestation_chunk(
        &self,
        peer: &Peer,
        global_time: u64,
        payload: AttestationChunkPayload,
    ) {
        let AttestationChunkPayload {
            hash,
            sequence_number,
            data,
        } = payload;

        let verify_id = ReceivingForVerification::id_for(&hash);
        if self.cache.has(&verify_id) {
            self.on_verification_chunk(peer, &hash, sequence_number, data);
            return;
        }

        if !self
            .on_issuance_chunk(peer, global_time, &hash, sequence_number, data)
            .await
        {
            warn!(
                peer = %peer,
                hash = %hash.short(),
                global_time,
                "Received attestation chunk which we did not request"
            );
        }
    }

    /// Verifier side: collect the disclosed blob, then start challenging.
    fn on_verification_chunk(
        &self,
        peer: &Peer,
        hash: &HashKey,
        sequence_number: u32,
        data: Vec<u8>,
    ) {
        let verify_id = ReceivingForVerification::id_for(hash);

        let completed = {
            let mut guard = self.cache.lock();
            let Some(transfer) = guard
                .get_mut(&verify_id)
                .and_then(Session::as_verify_transfer_mut)
            else {
                return;
            };

            self.accept_chunk(&mut transfer.chunks, peer, hash, sequence_number, data);
            debug!(peer = %peer, sequence_number, "Received attestation chunk for proving");

            match transfer.chunks.try_reassemble(hash) {
                Some(blob) => match guard.take(&verify_id) {
                    Session::VerifyTransfer(transfer) => Some((transfer.id_format, blob)),
                    _ => None,
                },
                None => None,
            }
        };

        let Some((id_format, blob)) = completed else {
            return;
        };

        let attestation = match self
            .algorithms
            .get(&id_format)
            .and_then(|algorithm| algorithm.deserialize(&blob))
        {
            Ok(attestation) => attestation,
            Err(e) => {
                warn!(peer = %peer, hash = %hash.short(), error = %e, "Disclosed attestation does not parse");
                return;
            }
        };
        self.on_received_attestation(peer, attestation, hash);
    }

    pub(super) fn accept_chunk(
        &self,
        chunks: &mut ChunkAccumulator,
        peer: &Peer,
        hash: &HashKey,
        sequence_number: u32,
        data: Vec<u8>,
    ) {
        match chunks.insert(sequence_number, data) {
            Accepted::New => {}
            Accepted::Replaced => {
                debug!(peer = %peer, sequence_number, "Chunk retransmitted, replacing");
            }
            Accepted::Rejected => {
                warn!(
                    peer = %peer,
                    hash = %hash.short(),
                    sequence_number,
                    "Transfer chunk limit reached, dropping chunk"
                );
            }
        }
    }
}
