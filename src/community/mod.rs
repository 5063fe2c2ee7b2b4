//! Attestation exchange and zero-knowledge verification engine.
//!
//! [`AttestationCommunity`] is the protocol node. It decodes inbound
//! packets, dispatches them to the issuance and verification flows, and
//! emits outbound packets through the [`Transport`]. All waiting state lives
//! in the [`RequestCache`]; the node itself only keeps the long-lived maps of
//! attestation keys and issuance nonces.
//!
//! ## Design
//!
//! - **Issuance** (`issuance.rs`): subject asks, attestor certifies and
//!   streams the blob back, subject persists it
//! - **Verification** (`verification.rs`): verifier pulls the disclosable
//!   blob and runs the challenge/response proof
//! - **Transfer** (`transfer.rs`): chunk streaming shared by both flows
//! - **Locking**: no lock is held across an `.await`; host callbacks and
//!   storage run lock-free
//! - **Sends**: fire-and-forget; a failed send is logged and treated as a lost
//!   datagram

mod config;
mod handler;
mod issuance;
mod transfer;
mod verification;

pub use config::{
    CommunityConfig, ConfigError, DEFAULT_HONESTY_CHECK_THRESHOLD,
    DEFAULT_MAX_OUTSTANDING_CHALLENGES,
};
pub use handler::{AttestationHandler, CompletedAttestation, StaticAttributeHandler};
pub use verification::VerificationResult;

use crate::algorithm::{AlgorithmError, AlgorithmRegistry, Attestation, SecretKey};
use crate::cache::{CacheError, RequestCache, Session};
use crate::hash::HashKey;
use crate::store::{AttestationStore, StoreError};
use crate::transfer::TransferError;
use crate::transport::{Peer, PeerId, Transport, TransportError};
use crate::wire::{MessageId, Packet, WireError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Largest step an inbound packet may move the logical clock forward.
pub const MAX_GLOBAL_TIME_JUMP: u64 = 1 << 32;

/// Errors returned by the initiating APIs
#[derive(Debug, Error)]
pub enum CommunityError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Session error: {0}")]
    Cache(#[from] CacheError),

    #[error("Algorithm error: {0}")]
    Algorithm(#[from] AlgorithmError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid metadata: {0}")]
    Metadata(String),
}

/// Secret key and format of an attestation we hold.
#[derive(Debug, Clone)]
struct AttestationKey {
    secret_key: SecretKey,
    id_format: String,
}

/// The attestation protocol node.
pub struct AttestationCommunity {
    me: Peer,
    config: CommunityConfig,
    cache: RequestCache,
    algorithms: AlgorithmRegistry,
    transport: Arc<dyn Transport>,
    store: Arc<dyn AttestationStore>,
    handler: Arc<dyn AttestationHandler>,
    global_time: AtomicU64,
    /// Issuance nonces we accept chunks under, per attestor
    allowed_nonces: Mutex<HashMap<PeerId, Vec<u64>>>,
    attestation_keys: Mutex<HashMap<HashKey, AttestationKey>>,
    /// Private attestations disclosed to a verifier, for answering challenges
    disclosed: Mutex<HashMap<HashKey, Attestation>>,
    rng: Mutex<StdRng>,
}

impl AttestationCommunity {
    pub fn new(
        me: Peer,
        config: CommunityConfig,
        algorithms: AlgorithmRegistry,
        transport: Arc<dyn Transport>,
        store: Arc<dyn AttestationStore>,
        handler: Arc<dyn AttestationHandler>,
    ) -> Result<Self, CommunityError> {
        config.validate()?;
        Ok(Self {
            me,
            cache: RequestCache::new(config.cache_timeouts()),
            config,
            algorithms,
            transport,
            store,
            handler,
            global_time: AtomicU64::new(0),
            allowed_nonces: Mutex::new(HashMap::new()),
            attestation_keys: Mutex::new(HashMap::new()),
            disclosed: Mutex::new(HashMap::new()),
            rng: Mutex::new(StdRng::from_entropy()),
        })
    }

    /// Replace the randomness source (deterministic runs).
    pub fn with_rng_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    /// Load the keys of every stored attestation.
    ///
    /// Records with an unknown format or an unreadable key are skipped.
    pub async fn load_keys(&self) -> Result<usize, CommunityError> {
        let records = self.store.get_all().await?;
        let mut loaded = 0;
        for record in records {
            let key = self
                .algorithms
                .get(&record.id_format)
                .and_then(|algorithm| algorithm.load_secret_key(&record.key));
            match key {
                Ok(secret_key) => {
                    self.remember_key(record.hash, secret_key, &record.id_format);
                    loaded += 1;
                }
                Err(e) => {
                    warn!(hash = %record.hash.short(), error = %e, "Skipping stored attestation");
                }
            }
        }
        info!(count = loaded, "Loaded attestation keys");
        Ok(loaded)
    }

    pub fn me(&self) -> &Peer {
        &self.me
    }

    pub fn config(&self) -> &CommunityConfig {
        &self.config
    }

    pub fn cache(&self) -> &RequestCache {
        &self.cache
    }

    pub fn algorithms(&self) -> &AlgorithmRegistry {
        &self.algorithms
    }

    /// Current logical clock value.
    pub fn global_time(&self) -> u64 {
        self.global_time.load(Ordering::SeqCst)
    }

    /// Advance the logical clock and return the new value.
    ///
    /// Saturates at `u64::MAX`.
    pub fn claim_global_time(&self) -> u64 {
        let previous = self
            .global_time
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| Some(t.saturating_add(1)))
            .unwrap_or_else(|t| t);
        previous.saturating_add(1)
    }

    pub fn has_attestation_key(&self, hash: &HashKey) -> bool {
        lock(&self.attestation_keys).contains_key(hash)
    }

    /// Issuance nonces currently accepted from `attestor`.
    pub fn allowed_nonces(&self, attestor: &PeerId) -> Vec<u64> {
        lock(&self.allowed_nonces)
            .get(attestor)
            .cloned()
            .unwrap_or_default()
    }

    /// Handle one inbound datagram from an authenticated peer.
    pub async fn on_packet(&self, peer: &Peer, bytes: &[u8]) {
        let packet = match Packet::decode(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(peer = %peer, error = %e, "Dropping undecodable packet");
                return;
            }
        };
        let now = self.global_time();
        if packet.global_time > now.saturating_add(MAX_GLOBAL_TIME_JUMP) {
            warn!(
                peer = %peer,
                global_time = packet.global_time,
                local_time = now,
                "Dropping packet with implausible global time"
            );
            return;
        }
        self.global_time.fetch_max(packet.global_time, Ordering::SeqCst);

        let message = match packet.message() {
            Ok(message) => message,
            Err(e) => {
                debug!(peer = %peer, error = %e, "Dropping packet");
                return;
            }
        };

        match message {
            MessageId::VerifyAttestationRequest => {
                if let Some(payload) = decode_payload(peer, &packet) {
                    self.on_verify_attestation_request(peer, payload).await;
                }
            }
            MessageId::Attestation => {
                if let Some(payload) = decode_payload(peer, &packet) {
                    self.on_attestation_chunk(peer, packet.global_time, payload)
                        .await;
                }
            }
            MessageId::Challenge => {
                if let Some(payload) = decode_payload(peer, &packet) {
                    self.on_challenge(peer, payload);
                }
            }
            MessageId::ChallengeResponse => {
                if let Some(payload) = decode_payload(peer, &packet) {
                    self.on_challenge_response(peer, payload);
                }
            }
            MessageId::AttestationRequest => {
                if let Some(payload) = decode_payload(peer, &packet) {
                    self.on_request_attestation(peer, packet.global_time, payload)
                        .await;
                }
            }
        }
    }

    /// Evict expired sessions and clean up what they leave behind.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let expired = self.cache.sweep(now);
        let count = expired.len();
        for session in expired {
            match session {
                Session::AttestationRequest(request) => {
                    warn!(
                        attestor = %request.attestor,
                        attribute = %request.attribute_name,
                        "Attestation request timed out"
                    );
                    self.forget_nonce(&request.attestor, request.nonce);
                }
                Session::VerifyTransfer(transfer) => {
                    warn!(hash = %transfer.hash.short(), "Attestation transfer for verification timed out");
                }
                Session::Proving(proving) => {
                    warn!(
                        hash = %proving.hash.short(),
                        unanswered = proving.remaining.len(),
                        "Verification timed out"
                    );
                }
                Session::Challenge(challenge) => {
                    debug!(challenge = %challenge.challenge_hash.short(), "Challenge timed out");
                }
            }
        }
        count
    }

    /// Run [`Self::sweep_expired`] every `sweep_interval` until the task is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let community = Arc::clone(self);
        let period = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let evicted = community.sweep_expired(Instant::now());
                if evicted > 0 {
                    debug!(evicted, "Swept expired sessions");
                }
            }
        })
    }

    fn remember_key(&self, hash: HashKey, secret_key: SecretKey, id_format: &str) {
        lock(&self.attestation_keys).insert(
            hash,
            AttestationKey {
                secret_key,
                id_format: id_format.to_string(),
            },
        );
    }

    fn attestation_key(&self, hash: &HashKey) -> Option<AttestationKey> {
        lock(&self.attestation_keys).get(hash).cloned()
    }

    fn allow_nonce(&self, attestor: &PeerId, nonce: u64) {
        lock(&self.allowed_nonces)
            .entry(attestor.clone())
            .or_default()
            .push(nonce);
    }

    fn is_nonce_allowed(&self, attestor: &PeerId, nonce: u64) -> bool {
        lock(&self.allowed_nonces)
            .get(attestor)
            .map_or(false, |nonces| nonces.contains(&nonce))
    }

    /// Drop an issuance nonce, removing the attestor entry once empty.
    fn forget_nonce(&self, attestor: &PeerId, nonce: u64) {
        let mut allowed = lock(&self.allowed_nonces);
        if let Some(nonces) = allowed.get_mut(attestor) {
            nonces.retain(|n| *n != nonce);
            if nonces.is_empty() {
                allowed.remove(attestor);
            }
        }
    }

    /// Draw whether the next challenge is an honesty probe, and its value.
    fn draw_honesty_probe(&self) -> Option<u8> {
        let mut rng = lock(&self.rng);
        if u16::from(rng.gen::<u8>()) < self.config.honesty_check_threshold {
            Some(rng.gen_range(0..3))
        } else {
            None
        }
    }

    fn send_message<P: Serialize>(
        &self,
        address: SocketAddr,
        message: MessageId,
        global_time: u64,
        payload: &P,
    ) -> Result<(), CommunityError> {
        let bytes = Packet::encode(message, global_time, payload)?;
        self.transport.send(address, bytes)?;
        Ok(())
    }

    /// Send from an inbound handler, where failure is only logged.
    fn send_or_log<P: Serialize>(
        &self,
        address: SocketAddr,
        message: MessageId,
        global_time: u64,
        payload: &P,
    ) {
        if let Err(e) = self.send_message(address, message, global_time, payload) {
            warn!(to = %address, ?message, error = %e, "Failed to send packet");
        }
    }
}

impl std::fmt::Debug for AttestationCommunity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttestationCommunity")
            .field("me", &self.me)
            .field("config", &self.config)
            .field("sessions", &self.cache.len())
            .field("global_time", &self.global_time())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn decode_payload<P: DeserializeOwned>(peer: &Peer, packet: &Packet) -> Option<P> {
    match packet.payload() {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!(
                peer = %peer,
                message_id = packet.message_id,
                error = %e,
                "Dropping malformed payload"
            );
            None
        }
    }
}
