//! Correlation store for in-flight protocol sessions.
//!
//! Protocol messages arrive scattered and out of order; the store is where
//! every waiting flow lives between messages. Records are keyed by
//! `(namespace, number)` and expire after a per-namespace TTL.
//!
//! ## Design
//!
//! - **Locking**: one `std::sync::Mutex` guards all records. It is never held
//!   across an `.await`; handlers that need a multi-step read-modify-write
//!   take a [`CacheGuard`] and release it before any callback or send.
//! - **Uniqueness**: a second `add` for a live key fails with
//!   [`CacheError::AlreadyExists`].
//! - **Expiry**: [`RequestCache::sweep`] evicts and returns expired records;
//!   the caller decides what eviction means for each flow.

pub mod sessions;

pub use sessions::{
    CompletionCallback, HonestyCheck, PendingAttestationRequest, PendingChallenge,
    ProvingSession, ReceivingForVerification, Session,
};

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Namespace of a session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CachePrefix {
    ReceiveAttestationRequest,
    ReceiveAttestationVerify,
    ProvingAttestation,
    PendingChallenge,
}

impl CachePrefix {
    /// Tag mixed into id derivation.
    pub fn tag(&self) -> &'static str {
        match self {
            CachePrefix::ReceiveAttestationRequest => "receive-request-attestation",
            CachePrefix::ReceiveAttestationVerify => "receive-verify-attestation",
            CachePrefix::ProvingAttestation => "proving-attestation",
            CachePrefix::PendingChallenge => "proving-hash",
        }
    }
}

impl fmt::Display for CachePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Correlation id of a session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheId {
    pub prefix: CachePrefix,
    pub number: u64,
}

impl fmt::Display for CacheId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:016x}", self.prefix, self.number)
    }
}

/// Derive a record id from its namespace and domain bytes.
///
/// First 8 bytes (big-endian) of `SHA-256(tag || 0x00 || domain)`.
pub fn derive_id(prefix: CachePrefix, domain: &[u8]) -> CacheId {
    let mut hasher = Sha256::new();
    hasher.update(prefix.tag().as_bytes());
    hasher.update([0u8]);
    hasher.update(domain);
    let digest = hasher.finalize();

    let mut number = [0u8; 8];
    number.copy_from_slice(&digest[..8]);
    CacheId {
        prefix,
        number: u64::from_be_bytes(number),
    }
}

/// Errors raised by the correlation store
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Session already exists: {0}")]
    AlreadyExists(CacheId),

    #[error("Session not found: {0}")]
    NotFound(CacheId),
}

/// Time-to-live per namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTimeouts {
    /// Issuance, blob transfer and proving sessions
    pub request: Duration,
    /// Individual pending challenges
    pub challenge: Duration,
}

impl CacheTimeouts {
    pub fn ttl_for(&self, prefix: CachePrefix) -> Duration {
        match prefix {
            CachePrefix::PendingChallenge => self.challenge,
            _ => self.request,
        }
    }
}

impl Default for CacheTimeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(60),
            challenge: Duration::from_secs(10),
        }
    }
}

#[derive(Debug)]
struct Entry {
    session: Session,
    expires_at: Instant,
}

/// Keyed, time-bounded store of session records.
#[derive(Debug)]
pub struct RequestCache {
    entries: Mutex<HashMap<CacheId, Entry>>,
    timeouts: CacheTimeouts,
}

impl RequestCache {
    pub fn new(timeouts: CacheTimeouts) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            timeouts,
        }
    }

    pub fn timeouts(&self) -> CacheTimeouts {
        self.timeouts
    }

    /// Exclusive access for an atomic multi-step update.
    pub fn lock(&self) -> CacheGuard<'_> {
        CacheGuard {
            entries: self.entries.lock().unwrap_or_else(PoisonError::into_inner),
            timeouts: self.timeouts,
        }
    }

    pub fn add(&self, session: Session) -> Result<CacheId, CacheError> {
        self.lock().add(session)
    }

    pub fn has(&self, id: &CacheId) -> bool {
        self.lock().has(id)
    }

    /// Run `f` against the record, if present.
    pub fn with_session<R>(&self, id: &CacheId, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.lock().get_mut(id).map(f)
    }

    pub fn pop(&self, id: &CacheId) -> Result<Session, CacheError> {
        self.lock().pop(id)
    }

    /// Evict every record whose deadline is at or before `now`.
    pub fn sweep(&self, now: Instant) -> Vec<Session> {
        let mut guard = self.lock();
        let expired: Vec<CacheId> = guard
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| guard.entries.remove(&id).map(|e| e.session))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live records in one namespace.
    pub fn count(&self, prefix: CachePrefix) -> usize {
        self.lock()
            .entries
            .keys()
            .filter(|id| id.prefix == prefix)
            .count()
    }
}

/// Held lock over the store.
pub struct CacheGuard<'a> {
    entries: MutexGuard<'a, HashMap<CacheId, Entry>>,
    timeouts: CacheTimeouts,
}

impl CacheGuard<'_> {
    pub fn has(&self, id: &CacheId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &CacheId) -> Option<&Session> {
        self.entries.get(id).map(|e| &e.session)
    }

    pub fn get_mut(&mut self, id: &CacheId) -> Option<&mut Session> {
        self.entries.get_mut(id).map(|e| &mut e.session)
    }

    pub fn add(&mut self, session: Session) -> Result<CacheId, CacheError> {
        let id = session.id();
        if self.entries.contains_key(&id) {
            return Err(CacheError::AlreadyExists(id));
        }
        let expires_at = Instant::now() + self.timeouts.ttl_for(id.prefix);
        self.entries.insert(id, Entry { session, expires_at });
        Ok(id)
    }

    pub fn pop(&mut self, id: &CacheId) -> Result<Session, CacheError> {
        self.entries
            .remove(id)
            .map(|e| e.session)
            .ok_or(CacheError::NotFound(*id))
    }

    /// Remove a record the caller has just checked to be present.
    ///
    /// # Panics
    ///
    /// Panics if the record is absent: that is a broken handler invariant,
    /// not a protocol condition.
    pub fn take(&mut self, id: &CacheId) -> Session {
        match self.entries.remove(id) {
            Some(entry) => entry.session,
            None => panic!("session {} asserted present but missing", id),
        }
    }

    /// Remove every record matching `predicate`.
    pub fn remove_where(&mut self, mut predicate: impl FnMut(&Session) -> bool) -> Vec<Session> {
        let matching: Vec<CacheId> = self
            .entries
            .iter()
            .filter(|(_, entry)| predicate(&entry.session))
            .map(|(id, _)| *id)
            .collect();

        matching
            .into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|e| e.session))
            .collect()
    }
}
