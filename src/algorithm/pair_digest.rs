//! Reference bit-pair algorithm.
//!
//! Splits the attested value into 2-bit pairs and commits to each pair by
//! masking it with a digest of the subject's public key. A challenge hands
//! the holder a committed pair and its index to open; the verifier tallies
//! opened values into a histogram and compares it against the histogram of
//! a claimed value.
//!
//! Honesty probes share the challenge layout: a known value masked under a
//! random index, so answering one takes the same unmasking as a genuine
//! opening. A prover that cross-checks challenges against its own
//! commitments can still tell most probes apart (the index may be out of
//! range, or the committed pair may not match).
//!
//! This scheme exercises every hook the protocol engine needs (per-pair
//! challenges, honesty probes, certainty aggregation). It does NOT hide the
//! attribute from anyone holding the public key and is not a substitute for
//! a real homomorphic commitment scheme.

use super::{
    AlgorithmError, AlgorithmResult, Attestation, CertaintyAggregate, IdentityAlgorithm,
    PublicKey, SecretKey, DEFAULT_ID_FORMAT,
};
use hkdf::Hkdf;
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};

/// Key derivation salt (versioned for rotation)
const KEY_SALT: &[u8] = b"zkattest-pair-digest-v1";

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 8;

/// Challenge layout: index (BE u32), committed pair, nonce
const CHALLENGE_LEN: usize = 4 + 1 + NONCE_LEN;

/// Number of distinct pair values
const PAIR_VALUES: u32 = 4;

/// Reference [`IdentityAlgorithm`] over 2-bit pairs.
#[derive(Debug, Clone)]
pub struct PairDigestAlgorithm {
    id_format: String,
    rng: SystemRandom,
}

impl PairDigestAlgorithm {
    pub fn new(id_format: &str) -> Self {
        Self {
            id_format: id_format.to_string(),
            rng: SystemRandom::new(),
        }
    }

    fn nonce(&self) -> AlgorithmResult<[u8; NONCE_LEN]> {
        let mut nonce = [0u8; NONCE_LEN];
        self.rng.fill(&mut nonce).map_err(|_| AlgorithmError::Rng)?;
        Ok(nonce)
    }

    fn challenge(&self, index: u32, committed: u8) -> AlgorithmResult<Vec<u8>> {
        let mut challenge = Vec::with_capacity(CHALLENGE_LEN);
        challenge.extend_from_slice(&index.to_be_bytes());
        challenge.push(committed);
        challenge.extend_from_slice(&self.nonce()?);
        Ok(challenge)
    }
}

impl Default for PairDigestAlgorithm {
    fn default() -> Self {
        Self::new(DEFAULT_ID_FORMAT)
    }
}

/// Split bytes into 2-bit pairs, most significant first.
fn bit_pairs(value: &[u8]) -> impl Iterator<Item = u8> + '_ {
    value
        .iter()
        .flat_map(|byte| [6u8, 4, 2, 0].into_iter().map(move |shift| (byte >> shift) & 0b11))
}

/// Mask applied to the pair at `index` for `public_key`.
fn pair_mask(public_key: &PublicKey, index: u32) -> u8 {
    let mut hasher = Sha256::new();
    hasher.update(public_key.as_bytes());
    hasher.update(index.to_be_bytes());
    hasher.finalize()[0] & 0b11
}

fn histogram(value: &[u8]) -> [u32; PAIR_VALUES as usize] {
    let mut counts = [0u32; PAIR_VALUES as usize];
    for pair in bit_pairs(value) {
        counts[pair as usize] += 1;
    }
    counts
}

impl IdentityAlgorithm for PairDigestAlgorithm {
    fn id_format(&self) -> &str {
        &self.id_format
    }

    fn honesty_check(&self) -> bool {
        true
    }

    fn generate_secret_key(&self) -> AlgorithmResult<SecretKey> {
        let mut key = [0u8; KEY_LEN];
        self.rng.fill(&mut key).map_err(|_| AlgorithmError::Rng)?;
        Ok(SecretKey::from_bytes(&key))
    }

    fn load_secret_key(&self, bytes: &[u8]) -> AlgorithmResult<SecretKey> {
        if bytes.len() != KEY_LEN {
            return Err(AlgorithmError::InvalidKey(format!(
                "secret key must be {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            )));
        }
        Ok(SecretKey::from_bytes(bytes))
    }

    fn load_public_key(&self, bytes: &[u8]) -> AlgorithmResult<PublicKey> {
        if bytes.len() != KEY_LEN {
            return Err(AlgorithmError::InvalidKey(format!(
                "public key must be {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            )));
        }
        Ok(PublicKey::from_bytes(bytes))
    }

    fn public_key(&self, secret_key: &SecretKey) -> AlgorithmResult<PublicKey> {
        let hk = Hkdf::<Sha256>::new(Some(KEY_SALT), secret_key.as_bytes());
        let mut public = [0u8; KEY_LEN];
        hk.expand(b"public-key", &mut public)
            .map_err(|e| AlgorithmError::InvalidKey(format!("HKDF expand failed: {}", e)))?;
        Ok(PublicKey::from_bytes(&public))
    }

    fn attest(&self, public_key: &PublicKey, value: &[u8]) -> AlgorithmResult<Vec<u8>> {
        self.load_public_key(public_key.as_bytes())?;

        let commitments = bit_pairs(value)
            .enumerate()
            .map(|(index, pair)| pair ^ pair_mask(public_key, index as u32))
            .collect();

        Attestation::new(&self.id_format, public_key.clone(), commitments).serialize()
    }

    fn deserialize(&self, blob: &[u8]) -> AlgorithmResult<Attestation> {
        let attestation = Attestation::from_blob(blob, &self.id_format)?;
        if attestation.commitments.iter().any(|c| u32::from(*c) >= PAIR_VALUES) {
            return Err(AlgorithmError::InvalidAttestation(
                "commitment out of range".to_string(),
            ));
        }
        Ok(attestation)
    }

    fn deserialize_private(
        &self,
        secret_key: &SecretKey,
        blob: &[u8],
    ) -> AlgorithmResult<Attestation> {
        let attestation = self.deserialize(blob)?;
        if self.public_key(secret_key)? != attestation.public_key {
            return Err(AlgorithmError::KeyMismatch);
        }
        Ok(attestation)
    }

    fn certainty(&self, value: &[u8], aggregate: &CertaintyAggregate) -> f64 {
        let observed = aggregate.total();
        if observed == 0 {
            return 0.0;
        }

        let expected = histogram(value);
        let expected_total: u32 = expected.iter().sum();
        let matched: u32 = (0..PAIR_VALUES)
            .map(|bucket| expected[bucket as usize].min(aggregate.count(bucket)))
            .sum();

        f64::from(matched) / f64::from(expected_total.max(observed))
    }

    fn create_certainty_aggregate(&self, attestation: Option<&Attestation>) -> CertaintyAggregate {
        match attestation {
            Some(_) => CertaintyAggregate::with_buckets(0..PAIR_VALUES),
            None => CertaintyAggregate::empty(),
        }
    }

    fn create_challenges(
        &self,
        public_key: &PublicKey,
        attestation: &Attestation,
    ) -> AlgorithmResult<Vec<Vec<u8>>> {
        if *public_key != attestation.public_key {
            return Err(AlgorithmError::KeyMismatch);
        }

        attestation
            .commitments
            .iter()
            .enumerate()
            .map(|(index, committed)| self.challenge(index as u32, *committed))
            .collect()
    }

    fn create_challenge_response(
        &self,
        secret_key: &SecretKey,
        attestation: &Attestation,
        challenge: &[u8],
    ) -> AlgorithmResult<Vec<u8>> {
        if self.public_key(secret_key)? != attestation.public_key {
            return Err(AlgorithmError::KeyMismatch);
        }

        match challenge {
            [i0, i1, i2, i3, committed, nonce @ ..]
                if nonce.len() == NONCE_LEN && u32::from(*committed) < PAIR_VALUES =>
            {
                let index = u32::from_be_bytes([*i0, *i1, *i2, *i3]);
                Ok(vec![committed ^ pair_mask(&attestation.public_key, index)])
            }
            _ => Err(AlgorithmError::InvalidChallenge(
                "unrecognized challenge layout".to_string(),
            )),
        }
    }

    fn process_challenge_response(
        &self,
        aggregate: &mut CertaintyAggregate,
        _challenge: &[u8],
        response: &[u8],
    ) -> AlgorithmResult<()> {
        match response {
            [value] if u32::from(*value) < PAIR_VALUES => {
                aggregate.record(u32::from(*value));
                Ok(())
            }
            _ => Err(AlgorithmError::InvalidChallenge(
                "malformed challenge response".to_string(),
            )),
        }
    }

    fn create_honesty_challenge(
        &self,
        public_key: &PublicKey,
        value: u8,
    ) -> AlgorithmResult<Vec<u8>> {
        if u32::from(value) >= PAIR_VALUES {
            return Err(AlgorithmError::InvalidChallenge(format!(
                "probe value {} is not a pair",
                value
            )));
        }
        let mut index = [0u8; 2];
        self.rng.fill(&mut index).map_err(|_| AlgorithmError::Rng)?;
        let index = u32::from(u16::from_be_bytes(index));
        self.challenge(index, value ^ pair_mask(public_key, index))
    }

    fn process_honesty_challenge(&self, value: u8, response: &[u8]) -> bool {
        response == [value]
    }
}
