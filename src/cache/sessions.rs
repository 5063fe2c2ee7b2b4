//! Session records kept in the correlation store.
//!
//! Every multi-step flow is represented by one variant. A record's
//! [`CacheId`] is derived from its namespace and a domain-specific byte
//! string, so the handler that receives the next message of a flow can
//! recompute the id from the message alone.

use super::{derive_id, CacheId, CachePrefix};
use crate::algorithm::{CertaintyAggregate, PublicKey, SecretKey};
use crate::hash::HashKey;
use crate::transfer::ChunkAccumulator;
use crate::transport::PeerId;
use std::fmt;

/// Invoked once with the final aggregate of a proving session.
pub type CompletionCallback = Box<dyn FnOnce(HashKey, CertaintyAggregate) + Send>;

/// Whether a pending challenge opens a committed pair or probes honesty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HonestyCheck {
    /// Genuine challenge from the algorithm's challenge set
    Genuine,
    /// Honesty probe whose correct answer is the carried value
    Probe(u8),
}

/// Subject side of issuance: waiting for the attestor's chunks.
#[derive(Debug)]
pub struct PendingAttestationRequest {
    pub attestor: PeerId,
    /// Global time the request was stamped with
    pub nonce: u64,
    pub secret_key: SecretKey,
    pub attribute_name: String,
    pub id_format: String,
    pub chunks: ChunkAccumulator,
}

impl PendingAttestationRequest {
    pub fn new(
        attestor: PeerId,
        nonce: u64,
        secret_key: SecretKey,
        attribute_name: &str,
        id_format: &str,
    ) -> Self {
        Self {
            attestor,
            nonce,
            secret_key,
            attribute_name: attribute_name.to_string(),
            id_format: id_format.to_string(),
            chunks: ChunkAccumulator::new(),
        }
    }

    /// Id of the request sent to `attestor` at global time `nonce`.
    pub fn id_for(attestor: &PeerId, nonce: u64) -> CacheId {
        let mut domain = attestor.as_bytes().to_vec();
        domain.extend_from_slice(nonce.to_string().as_bytes());
        derive_id(CachePrefix::ReceiveAttestationRequest, &domain)
    }
}

/// Verifier side: collecting the disclosable blob before challenging.
#[derive(Debug)]
pub struct ReceivingForVerification {
    pub hash: HashKey,
    pub id_format: String,
    pub chunks: ChunkAccumulator,
}

impl ReceivingForVerification {
    pub fn new(hash: HashKey, id_format: &str) -> Self {
        Self {
            hash,
            id_format: id_format.to_string(),
            chunks: ChunkAccumulator::new(),
        }
    }

    pub fn id_for(hash: &HashKey) -> CacheId {
        derive_id(CachePrefix::ReceiveAttestationVerify, hash.as_bytes())
    }
}

/// Verifier side: the running zero-knowledge proof for one attestation.
pub struct ProvingSession {
    pub hash: HashKey,
    pub id_format: String,
    /// Challenges not yet answered, in issue order: `(challenge hash, bytes)`
    pub remaining: Vec<(HashKey, Vec<u8>)>,
    pub aggregate: CertaintyAggregate,
    /// Learned from the blob once it arrives
    pub public_key: Option<PublicKey>,
    on_complete: Option<CompletionCallback>,
}

impl ProvingSession {
    pub fn new(hash: HashKey, id_format: &str, on_complete: CompletionCallback) -> Self {
        Self {
            hash,
            id_format: id_format.to_string(),
            remaining: Vec::new(),
            aggregate: CertaintyAggregate::empty(),
            public_key: None,
            on_complete: Some(on_complete),
        }
    }

    pub fn id_for(hash: &HashKey) -> CacheId {
        derive_id(CachePrefix::ProvingAttestation, hash.as_bytes())
    }

    /// Drop a challenge from the unanswered list; `false` when it was not there.
    pub fn remove_challenge(&mut self, challenge_hash: &HashKey) -> bool {
        match self.remaining.iter().position(|(h, _)| h == challenge_hash) {
            Some(index) => {
                self.remaining.remove(index);
                true
            }
            None => false,
        }
    }

    /// Hand out the completion callback; only the first call returns it.
    pub fn take_callback(&mut self) -> Option<CompletionCallback> {
        self.on_complete.take()
    }
}

impl fmt::Debug for ProvingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvingSession")
            .field("hash", &self.hash)
            .field("id_format", &self.id_format)
            .field("remaining", &self.remaining.len())
            .field("aggregate", &self.aggregate)
            .field("public_key", &self.public_key)
            .field("has_callback", &self.on_complete.is_some())
            .finish()
    }
}

/// Verifier side: one challenge in flight.
#[derive(Debug, Clone)]
pub struct PendingChallenge {
    pub challenge_hash: HashKey,
    /// Owning [`ProvingSession`], by key
    pub owner: CacheId,
    pub id_format: String,
    pub honesty: HonestyCheck,
}

impl PendingChallenge {
    pub fn id_for(challenge_hash: &HashKey) -> CacheId {
        derive_id(CachePrefix::PendingChallenge, challenge_hash.as_bytes())
    }
}

/// Any record held by the correlation store.
#[derive(Debug)]
pub enum Session {
    AttestationRequest(PendingAttestationRequest),
    VerifyTransfer(ReceivingForVerification),
    Proving(ProvingSession),
    Challenge(PendingChallenge),
}

impl Session {
    pub fn prefix(&self) -> CachePrefix {
        match self {
            Session::AttestationRequest(_) => CachePrefix::ReceiveAttestationRequest,
            Session::VerifyTransfer(_) => CachePrefix::ReceiveAttestationVerify,
            Session::Proving(_) => CachePrefix::ProvingAttestation,
            Session::Challenge(_) => CachePrefix::PendingChallenge,
        }
    }

    /// Correlation id recomputed from the record's own fields.
    pub fn id(&self) -> CacheId {
        match self {
            Session::AttestationRequest(s) => PendingAttestationRequest::id_for(&s.attestor, s.nonce),
            Session::VerifyTransfer(s) => ReceivingForVerification::id_for(&s.hash),
            Session::Proving(s) => ProvingSession::id_for(&s.hash),
            Session::Challenge(s) => PendingChallenge::id_for(&s.challenge_hash),
        }
    }

    pub fn as_attestation_request_mut(&mut self) -> Option<&mut PendingAttestationRequest> {
        match self {
            Session::AttestationRequest(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_verify_transfer_mut(&mut self) -> Option<&mut ReceivingForVerification> {
        match self {
            Session::VerifyTransfer(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_proving(&self) -> Option<&ProvingSession> {
        match self {
            Session::Proving(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_proving_mut(&mut self) -> Option<&mut ProvingSession> {
        match self {
            Session::Proving(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_proving(self) -> Option<ProvingSession> {
        match self {
            Session::Proving(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_challenge(&self) -> Option<&PendingChallenge> {
        match self {
            Session::Challenge(s) => Some(s),
            _ => None,
        }
    }
}
