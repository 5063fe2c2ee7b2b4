//! Identity algorithm boundary.
//!
//! The protocol engine never does commitment math itself. Everything that
//! depends on the commitment scheme (key handling, attesting a value,
//! building and answering challenges, folding responses into a certainty
//! estimate) goes through [`IdentityAlgorithm`], selected per attestation by
//! its identity-format tag through the [`AlgorithmRegistry`].
//!
//! [`PairDigestAlgorithm`] is the bundled reference scheme registered under
//! [`DEFAULT_ID_FORMAT`].

pub mod pair_digest;
pub mod registry;

pub use pair_digest::PairDigestAlgorithm;
pub use registry::AlgorithmRegistry;

use crate::hash::{digest, HashKey};
use crate::serialization::{from_cbor, to_cbor, SerializationError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Identity format used when a request does not name one.
pub const DEFAULT_ID_FORMAT: &str = "id_metadata";

/// Errors raised by identity algorithms
#[derive(Debug, Error)]
pub enum AlgorithmError {
    #[error("Unknown identity format: {0}")]
    UnknownFormat(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid attestation: {0}")]
    InvalidAttestation(String),

    #[error("Invalid challenge: {0}")]
    InvalidChallenge(String),

    #[error("Key does not match attestation")]
    KeyMismatch,

    #[error("Serialization failed: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Randomness unavailable")]
    Rng,
}

pub type AlgorithmResult<T> = Result<T, AlgorithmError>;

/// Private key of an attestation subject.
///
/// Wiped from memory on drop; `Debug` never prints the key material.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey(Vec<u8>);

impl SecretKey {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey([REDACTED; {}])", self.0.len())
    }
}

/// Public key an attestation is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "serde_bytes")] Vec<u8>);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Serialized form of an attestation.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AttestationWire {
    public_key: PublicKey,
    #[serde(with = "serde_bytes")]
    commitments: Vec<u8>,
}

/// A certified attribute bound to a subject's public key.
///
/// `commitments` is opaque to everything but the algorithm named by
/// `id_format`. The content hash is the digest of [`Attestation::serialize`],
/// which is what peers use to address the attestation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attestation {
    pub id_format: String,
    pub public_key: PublicKey,
    pub commitments: Vec<u8>,
}

impl Attestation {
    pub fn new(id_format: &str, public_key: PublicKey, commitments: Vec<u8>) -> Self {
        Self {
            id_format: id_format.to_string(),
            public_key,
            commitments,
        }
    }

    /// Disclosable serialization (never contains private material).
    pub fn serialize(&self) -> AlgorithmResult<Vec<u8>> {
        let wire = AttestationWire {
            public_key: self.public_key.clone(),
            commitments: self.commitments.clone(),
        };
        Ok(to_cbor(&wire)?)
    }

    /// Parse a blob produced by [`Attestation::serialize`].
    pub fn from_blob(blob: &[u8], id_format: &str) -> AlgorithmResult<Self> {
        let wire: AttestationWire = from_cbor(blob)?;
        Ok(Self {
            id_format: id_format.to_string(),
            public_key: wire.public_key,
            commitments: wire.commitments,
        })
    }

    /// Content hash addressing this attestation.
    pub fn hash(&self) -> AlgorithmResult<HashKey> {
        Ok(digest(&self.serialize()?))
    }
}

/// Running tally of how challenge responses distribute over answer values.
///
/// The "relativity map": answer value -> number of responses carrying it.
/// An empty aggregate is the null result reported for a cheating prover.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertaintyAggregate {
    counts: BTreeMap<u32, u32>,
}

impl CertaintyAggregate {
    /// Aggregate with no buckets (zero confidence for every value).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Aggregate with zeroed buckets for the given answer values.
    pub fn with_buckets(buckets: impl IntoIterator<Item = u32>) -> Self {
        Self {
            counts: buckets.into_iter().map(|b| (b, 0)).collect(),
        }
    }

    pub fn record(&mut self, bucket: u32) {
        *self.counts.entry(bucket).or_insert(0) += 1;
    }

    pub fn count(&self, bucket: u32) -> u32 {
        self.counts.get(&bucket).copied().unwrap_or(0)
    }

    /// Total responses folded in.
    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn buckets(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.counts.iter().map(|(k, v)| (*k, *v))
    }
}

/// Commitment scheme primitives consumed by the issuance and verification
/// flows.
///
/// Implementations are stateless with respect to sessions; all protocol
/// state lives in the correlation store.
pub trait IdentityAlgorithm: Send + Sync {
    /// Identity-format tag this algorithm is registered under.
    fn id_format(&self) -> &str;

    /// Whether the verifier may interleave honesty probes.
    fn honesty_check(&self) -> bool;

    fn generate_secret_key(&self) -> AlgorithmResult<SecretKey>;

    fn load_secret_key(&self, bytes: &[u8]) -> AlgorithmResult<SecretKey>;

    fn load_public_key(&self, bytes: &[u8]) -> AlgorithmResult<PublicKey>;

    fn public_key(&self, secret_key: &SecretKey) -> AlgorithmResult<PublicKey>;

    /// Certify `value` for the holder of `public_key`; returns the blob.
    fn attest(&self, public_key: &PublicKey, value: &[u8]) -> AlgorithmResult<Vec<u8>>;

    fn deserialize(&self, blob: &[u8]) -> AlgorithmResult<Attestation>;

    /// Deserialize a blob the holder owns, checking it against the key.
    fn deserialize_private(
        &self,
        secret_key: &SecretKey,
        blob: &[u8],
    ) -> AlgorithmResult<Attestation>;

    /// Confidence in `[0, 1]` that the certified value equals `value`.
    fn certainty(&self, value: &[u8], aggregate: &CertaintyAggregate) -> f64;

    /// Fresh aggregate; `None` yields the null (zero-confidence) aggregate.
    fn create_certainty_aggregate(&self, attestation: Option<&Attestation>) -> CertaintyAggregate;

    /// One challenge per committed bit-pair, in order.
    fn create_challenges(
        &self,
        public_key: &PublicKey,
        attestation: &Attestation,
    ) -> AlgorithmResult<Vec<Vec<u8>>>;

    fn create_challenge_response(
        &self,
        secret_key: &SecretKey,
        attestation: &Attestation,
        challenge: &[u8],
    ) -> AlgorithmResult<Vec<u8>>;

    fn process_challenge_response(
        &self,
        aggregate: &mut CertaintyAggregate,
        challenge: &[u8],
        response: &[u8],
    ) -> AlgorithmResult<()>;

    /// Challenge whose correct answer is `value`.
    fn create_honesty_challenge(
        &self,
        public_key: &PublicKey,
        value: u8,
    ) -> AlgorithmResult<Vec<u8>>;

    fn process_honesty_challenge(&self, value: u8, response: &[u8]) -> bool;
}
