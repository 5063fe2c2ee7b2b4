//! Zero-knowledge verification.
//!
//! ```text
//! Verifier                                     Prover
//!    | VERIFY_ATTESTATION_REQUEST (hash) ->      |  authorize_verification()
//!    |  <- ATTESTATION chunks (public blob)      |
//!    | CHALLENGE x window ->                     |
//!    |  <- CHALLENGE_RESPONSE                    |
//!    | CHALLENGE (next, or honesty probe) ->     |
//!    |  ...until every bit-pair is answered      |
//! ```
//!
//! ## Design
//!
//! - **Window**: at most `max_outstanding_challenges` challenges are in
//!   flight; every response releases one slot and fills at most one
//! - **Honesty probes**: with probability `threshold / 256` the next
//!   challenge has a known answer; a wrong answer aborts the proof with the
//!   null aggregate
//! - **Atomicity**: a response is processed and the next challenge chosen
//!   under one cache guard; callbacks and sends happen after it is released

use super::{AttestationCommunity, CommunityError};
use crate::algorithm::{Attestation, CertaintyAggregate, IdentityAlgorithm};
use crate::cache::{
    CacheGuard, CacheId, CompletionCallback, HonestyCheck, PendingChallenge, ProvingSession,
    ReceivingForVerification, Session,
};
use crate::hash::{digest, HashKey};
use crate::transport::Peer;
use crate::wire::{
    ChallengePayload, ChallengeResponsePayload, MessageId, VerifyAttestationRequestPayload,
};
use std::net::SocketAddr;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Outcome of a verification: one certainty per claimed value, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationResult {
    pub hash: HashKey,
    pub certainties: Vec<f64>,
}

/// What a challenge response leads to once the guard is released.
enum Followup {
    Nothing,
    Challenge(ChallengePayload),
    Finished {
        callback: Option<CompletionCallback>,
        hash: HashKey,
        aggregate: CertaintyAggregate,
    },
}

/// State of the proving session after folding in a response.
enum Verdict {
    Continue,
    Complete,
    Cheated,
}

impl AttestationCommunity {
    /// Verify that the attestation `hash` held by the peer at `address`
    /// certifies one of `values`.
    ///
    /// `callback` receives one certainty in `[0, 1]` per value once the proof
    /// completes, or all zeros if the prover is caught cheating. It is not
    /// called when the session times out.
    pub fn verify_attestation_values<F>(
        &self,
        address: SocketAddr,
        hash: HashKey,
        values: Vec<Vec<u8>>,
        id_format: &str,
        callback: F,
    ) -> Result<(), CommunityError>
    where
        F: FnOnce(HashKey, Vec<f64>) + Send + 'static,
    {
        let algorithm = self.algorithms.get(id_format)?;

        let on_complete: CompletionCallback = Box::new(move |hash, aggregate| {
            let certainties = values
                .iter()
                .map(|value| algorithm.certainty(value, &aggregate))
                .collect();
            callback(hash, certainties);
        });

        let proving_id = {
            let mut guard = self.cache.lock();
            let proving_id = guard.add(Session::Proving(ProvingSession::new(
                hash.clone(),
                id_format,
                on_complete,
            )))?;
            if let Err(e) = guard.add(Session::VerifyTransfer(ReceivingForVerification::new(
                hash.clone(),
                id_format,
            ))) {
                guard.take(&proving_id);
                return Err(e.into());
            }
            proving_id
        };

        info!(to = %address, hash = %hash.short(), id_format, "Requesting attestation for verification");
        let sent = self.send_message(
            address,
            MessageId::VerifyAttestationRequest,
            self.claim_global_time(),
            &VerifyAttestationRequestPayload { hash: hash.clone() },
        );
        if sent.is_err() {
            let mut guard = self.cache.lock();
            let _ = guard.pop(&proving_id);
            let _ = guard.pop(&ReceivingForVerification::id_for(&hash));
        }
        sent
    }

    /// [`Self::verify_attestation_values`] with the result delivered on a channel.
    ///
    /// The receiver errors if the session expires before completing.
    pub fn verify_attestation(
        &self,
        address: SocketAddr,
        hash: HashKey,
        values: Vec<Vec<u8>>,
        id_format: &str,
    ) -> Result<oneshot::Receiver<VerificationResult>, CommunityError> {
        let (tx, rx) = oneshot::channel();
        self.verify_attestation_values(address, hash, values, id_format, move |hash, certainties| {
            let _ = tx.send(VerificationResult { hash, certainties });
        })?;
        Ok(rx)
    }

    /// Prover side: disclose the public form of an attestation we hold.
    pub(super) async fn on_verify_attestation_request(
        &self,
        peer: &Peer,
        payload: VerifyAttestationRequestPayload,
    ) {
        let hash = payload.hash;
        info!(peer = %peer, hash = %hash.short(), "Received verification request");

        let blob = match self.store.get_attestation_by_hash(&hash).await {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                warn!(peer = %peer, hash = %hash.short(), "Dropping verification request of unknown hash");
                return;
            }
            Err(e) => {
                error!(hash = %hash.short(), error = %e, "Failed to read attestation store");
                return;
            }
        };
        if blob.is_empty() {
            warn!(hash = %hash.short(), "Attestation blob for verification is empty");
        }

        if !self.handler.authorize_verification(peer, &hash).await {
            info!(peer = %peer, hash = %hash.short(), "Verification not authorized");
            return;
        }

        let Some(key) = self.attestation_key(&hash) else {
            warn!(hash = %hash.short(), "No key for stored attestation");
            return;
        };
        let disclosed = self
            .algorithms
            .get(&key.id_format)
            .and_then(|algorithm| algorithm.deserialize_private(&key.secret_key, &blob))
            .and_then(|attestation| Ok((attestation.serialize()?, attestation)));
        let (public_blob, attestation) = match disclosed {
            Ok(disclosed) => disclosed,
            Err(e) => {
                warn!(hash = %hash.short(), error = %e, "Cannot load stored attestation");
                return;
            }
        };

        super::lock(&self.disclosed).insert(hash.clone(), attestation);
        if let Err(e) = self.send_attestation(peer.address, &public_blob, self.claim_global_time())
        {
            warn!(peer = %peer, error = %e, "Failed to send attestation");
        }
    }

    /// Verifier side: the disclosed blob is complete, open the challenge window.
    pub(super) fn on_received_attestation(
        &self,
        peer: &Peer,
        attestation: Attestation,
        hash: &HashKey,
    ) {
        let algorithm = match self.algorithms.get(&attestation.id_format) {
            Ok(algorithm) => algorithm,
            Err(e) => {
                warn!(error = %e, "Dropping received attestation");
                return;
            }
        };
        let challenges = match algorithm.create_challenges(&attestation.public_key, &attestation) {
            Ok(challenges) => challenges,
            Err(e) => {
                warn!(peer = %peer, error = %e, "Cannot build challenges");
                return;
            }
        };

        let owner = ProvingSession::id_for(hash);
        let outbound = {
            let mut guard = self.cache.lock();
            let Some(session) = guard.get_mut(&owner).and_then(Session::as_proving_mut) else {
                warn!(peer = %peer, hash = %hash.short(), "Received attestation for non-existing proving session");
                return;
            };

            session.public_key = Some(attestation.public_key.clone());
            session.aggregate = algorithm.create_certainty_aggregate(Some(&attestation));
            session.remaining = challenges
                .into_iter()
                .map(|challenge| (digest(&challenge), challenge))
                .collect();
            if session.remaining.is_empty() {
                info!(peer = %peer, hash = %hash.short(), "Attestation has nothing to challenge");
                let Some(mut session) = finish_proving(&mut guard, &owner) else {
                    return;
                };
                drop(guard);
                if let Some(callback) = session.take_callback() {
                    let aggregate = std::mem::take(&mut session.aggregate);
                    callback(session.hash.clone(), aggregate);
                }
                return;
            }
            let candidates = session.remaining.clone();
            let id_format = session.id_format.clone();

            let mut outbound = Vec::new();
            for (challenge_hash, challenge) in candidates {
                if outbound.len() >= self.config.max_outstanding_challenges {
                    break;
                }
                if guard.has(&PendingChallenge::id_for(&challenge_hash)) {
                    continue;
                }
                if guard
                    .add(Session::Challenge(PendingChallenge {
                        challenge_hash,
                        owner,
                        id_format: id_format.clone(),
                        honesty: HonestyCheck::Genuine,
                    }))
                    .is_ok()
                {
                    outbound.push(challenge);
                }
            }
            outbound
        };

        info!(
            peer = %peer,
            hash = %hash.short(),
            sending = outbound.len(),
            "Sending initial challenges"
        );
        for challenge in outbound {
            self.send_or_log(
                peer.address,
                MessageId::Challenge,
                self.claim_global_time(),
                &ChallengePayload {
                    attestation_hash: hash.clone(),
                    challenge,
                },
            );
        }
    }

    /// Prover side: answer a challenge against a disclosed attestation.
    pub(super) fn on_challenge(&self, peer: &Peer, payload: ChallengePayload) {
        let hash = &payload.attestation_hash;
        let Some(key) = self.attestation_key(hash) else {
            warn!(peer = %peer, hash = %hash.short(), "Challenge for unknown attestation");
            return;
        };
        let Some(attestation) = super::lock(&self.disclosed).get(hash).cloned() else {
            warn!(peer = %peer, hash = %hash.short(), "Challenge for attestation never disclosed");
            return;
        };

        let response = self
            .algorithms
            .get(&key.id_format)
            .and_then(|algorithm| {
                algorithm.create_challenge_response(&key.secret_key, &attestation, &payload.challenge)
            });
        match response {
            Ok(response) => {
                debug!(peer = %peer, hash = %hash.short(), "Answering challenge");
                self.send_or_log(
                    peer.address,
                    MessageId::ChallengeResponse,
                    self.claim_global_time(),
                    &ChallengeResponsePayload {
                        challenge_hash: digest(&payload.challenge),
                        response,
                    },
                );
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "Cannot answer challenge");
            }
        }
    }

    /// Verifier side: fold a response in and decide what happens next.
    pub(super) fn on_challenge_response(&self, peer: &Peer, payload: ChallengeResponsePayload) {
        let followup = {
            let mut guard = self.cache.lock();
            self.process_response(&mut guard, peer, &payload)
        };

        match followup {
            Followup::Nothing => {}
            Followup::Challenge(challenge) => {
                self.send_or_log(
                    peer.address,
                    MessageId::Challenge,
                    self.claim_global_time(),
                    &challenge,
                );
            }
            Followup::Finished {
                callback,
                hash,
                aggregate,
            } => {
                if let Some(callback) = callback {
                    callback(hash, aggregate);
                }
            }
        }
    }

    fn process_response(
        &self,
        guard: &mut CacheGuard<'_>,
        peer: &Peer,
        payload: &ChallengeResponsePayload,
    ) -> Followup {
        let pending_id = PendingChallenge::id_for(&payload.challenge_hash);
        let pending = match guard.pop(&pending_id) {
            Ok(Session::Challenge(pending)) => pending,
            _ => {
                debug!(peer = %peer, challenge = %payload.challenge_hash.short(), "Response to unknown challenge");
                return Followup::Nothing;
            }
        };
        let owner = pending.owner;

        let algorithm = match self.algorithms.get(&pending.id_format) {
            Ok(algorithm) => algorithm,
            Err(e) => {
                warn!(error = %e, "Dropping challenge response");
                return Followup::Nothing;
            }
        };

        let verdict = {
            let Some(session) = guard.get_mut(&owner).and_then(Session::as_proving_mut) else {
                info!(peer = %peer, "Challenge response for finished or expired verification");
                return Followup::Nothing;
            };
            let challenge = session
                .remaining
                .iter()
                .position(|(h, _)| *h == payload.challenge_hash)
                .map(|index| session.remaining.remove(index).1);

            let honest = match pending.honesty {
                HonestyCheck::Genuine => {
                    match challenge {
                        Some(challenge) => {
                            if let Err(e) = algorithm.process_challenge_response(
                                &mut session.aggregate,
                                &challenge,
                                &payload.response,
                            ) {
                                warn!(peer = %peer, error = %e, "Ignoring malformed challenge response");
                            }
                        }
                        None => {
                            warn!(peer = %peer, "Response to challenge not in the remaining set");
                        }
                    }
                    true
                }
                HonestyCheck::Probe(value) => {
                    algorithm.process_honesty_challenge(value, &payload.response)
                }
            };

            if !honest {
                Verdict::Cheated
            } else if session.remaining.is_empty() {
                Verdict::Complete
            } else {
                Verdict::Continue
            }
        };

        match verdict {
            Verdict::Cheated => {
                error!(peer = %peer, "Prover attempted to cheat in the ZKP");
                let Some(mut session) = finish_proving(guard, &owner) else {
                    return Followup::Nothing;
                };
                Followup::Finished {
                    callback: session.take_callback(),
                    hash: session.hash.clone(),
                    aggregate: algorithm.create_certainty_aggregate(None),
                }
            }
            Verdict::Complete => {
                info!(peer = %peer, "Completed attestation verification");
                let Some(mut session) = finish_proving(guard, &owner) else {
                    return Followup::Nothing;
                };
                Followup::Finished {
                    callback: session.take_callback(),
                    hash: session.hash.clone(),
                    aggregate: std::mem::take(&mut session.aggregate),
                }
            }
            Verdict::Continue => self.next_challenge(guard, algorithm.as_ref(), &owner),
        }
    }

    /// Pick and register the next challenge for `owner`.
    ///
    /// Honesty probes colliding with a pending challenge fall back to the
    /// first genuine challenge not yet in flight. With none left the session
    /// waits for its outstanding responses.
    fn next_challenge(
        &self,
        guard: &mut CacheGuard<'_>,
        algorithm: &dyn IdentityAlgorithm,
        owner: &CacheId,
    ) -> Followup {
        let Some(session) = guard.get(owner).and_then(Session::as_proving) else {
            return Followup::Nothing;
        };

        let mut next = None;
        if algorithm.honesty_check() {
            if let (Some(value), Some(public_key)) =
                (self.draw_honesty_probe(), session.public_key.as_ref())
            {
                match algorithm.create_honesty_challenge(public_key, value) {
                    Ok(probe) => {
                        if !guard.has(&PendingChallenge::id_for(&digest(&probe))) {
                            next = Some((probe, HonestyCheck::Probe(value)));
                        }
                    }
                    Err(e) => warn!(error = %e, "Cannot build honesty challenge"),
                }
            }
        }
        if next.is_none() {
            next = session
                .remaining
                .iter()
                .find(|(h, _)| !guard.has(&PendingChallenge::id_for(h)))
                .map(|(_, challenge)| (challenge.clone(), HonestyCheck::Genuine));
        }

        let Some((challenge, honesty)) = next else {
            info!(hash = %session.hash.short(), "No more bit-pairs to challenge");
            return Followup::Nothing;
        };

        let attestation_hash = session.hash.clone();
        let id_format = session.id_format.clone();
        debug!(
            ?honesty,
            remaining = session.remaining.len(),
            "Sending next challenge"
        );

        let added = guard.add(Session::Challenge(PendingChallenge {
            challenge_hash: digest(&challenge),
            owner: *owner,
            id_format,
            honesty,
        }));
        match added {
            Ok(_) => Followup::Challenge(ChallengePayload {
                attestation_hash,
                challenge,
            }),
            Err(e) => {
                warn!(error = %e, "Cannot register next challenge");
                Followup::Nothing
            }
        }
    }
}

/// Remove a proving session and every challenge it still has in flight.
fn finish_proving(guard: &mut CacheGuard<'_>, owner: &CacheId) -> Option<ProvingSession> {
    let purged = guard.remove_where(|s| s.as_challenge().map_or(false, |c| c.owner == *owner));
    if !purged.is_empty() {
        debug!(purged = purged.len(), "Purged pending challenges");
    }
    guard.take(owner).into_proving()
}
