//! End-to-end zero-knowledge verification between in-process nodes.

mod common;

use common::{issue, message_of, CallbackLog, Network, TestNode};
use std::time::{Duration, Instant};
use zkattest::algorithm::DEFAULT_ID_FORMAT;
use zkattest::cache::CachePrefix;
use zkattest::community::StaticAttributeHandler;
use zkattest::hash::{digest, HashKey};
use zkattest::wire::{ChallengePayload, ChallengeResponsePayload, MessageId, Packet};
use zkattest::CommunityConfig;

const ATTESTOR: usize = 0;
const PROVER: usize = 1;
const VERIFIER: usize = 2;

/// Attestor certifying `value` as "age", a prover that allows verification,
/// and a verifier running `verifier_config`.
fn network(value: &[u8], verifier_config: CommunityConfig) -> Network {
    Network::new(vec![
        TestNode::new(
            9101,
            CommunityConfig::default(),
            StaticAttributeHandler::new().with_attribute("age", value),
        ),
        TestNode::new(
            9102,
            CommunityConfig::default(),
            StaticAttributeHandler::new().allow_verification(true),
        ),
        TestNode::new(9103, verifier_config, StaticAttributeHandler::new()),
    ])
}

fn start_verification(network: &Network, hash: &HashKey, values: &[&[u8]]) -> CallbackLog {
    let log = CallbackLog::default();
    network.nodes[VERIFIER]
        .community
        .verify_attestation_values(
            network.nodes[PROVER].peer.address,
            hash.clone(),
            values.iter().map(|v| v.to_vec()).collect(),
            DEFAULT_ID_FORMAT,
            log.callback(),
        )
        .unwrap();
    log
}

#[tokio::test]
async fn test_honest_prover_verifies_true_value() {
    let network = network(&[0x2A], CommunityConfig::default());
    let hash = issue(&network, ATTESTOR, PROVER, "age").await;

    let log = start_verification(&network, &hash, &[&[0x2A], &[0xFF]]);
    network.pump().await;

    let calls = log.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, hash);
    assert_eq!(calls[0].1, vec![1.0, 0.0]);

    let verifier = &network.nodes[VERIFIER];
    assert_eq!(verifier.count(CachePrefix::ProvingAttestation), 0);
    assert_eq!(verifier.count(CachePrefix::ReceiveAttestationVerify), 0);
    assert_eq!(verifier.count(CachePrefix::PendingChallenge), 0);
}

#[tokio::test]
async fn test_verify_attestation_resolves_channel() {
    let network = network(&[0x2A, 0x17], CommunityConfig::default());
    let hash = issue(&network, ATTESTOR, PROVER, "age").await;

    let rx = network.nodes[VERIFIER]
        .community
        .verify_attestation(
            network.nodes[PROVER].peer.address,
            hash.clone(),
            vec![vec![0x2A, 0x17]],
            DEFAULT_ID_FORMAT,
        )
        .unwrap();
    network.pump().await;

    let result = rx.await.unwrap();
    assert_eq!(result.hash, hash);
    assert_eq!(result.certainties, vec![1.0]);
}

#[tokio::test]
async fn test_challenge_window_is_bounded() {
    let config = CommunityConfig {
        max_outstanding_challenges: 10,
        ..CommunityConfig::default()
    };
    // 16 bytes -> 64 bit-pairs
    let network = network(&[0xA5; 16], config);
    let hash = issue(&network, ATTESTOR, PROVER, "age").await;
    let log = start_verification(&network, &hash, &[&[0xA5; 16]]);

    let verifier = &network.nodes[VERIFIER];
    let mut peak = 0;
    network
        .pump_with(|_, _| {
            let pending = verifier.count(CachePrefix::PendingChallenge);
            assert!(pending <= 10, "{} challenges outstanding", pending);
            peak = peak.max(pending);
            true
        })
        .await;

    assert_eq!(peak, 10);
    assert_eq!(log.calls().len(), 1);
    assert_eq!(log.calls()[0].1, vec![1.0]);
}

#[tokio::test]
async fn test_cheating_prover_gets_zero_certainty() {
    let config = CommunityConfig {
        max_outstanding_challenges: 5,
        // Every follow-up is an honesty probe
        honesty_check_threshold: 256,
        ..CommunityConfig::default()
    };
    // 2 bytes -> 8 bit-pairs
    let network = network(&[0x2A, 0x01], config);
    let hash = issue(&network, ATTESTOR, PROVER, "age").await;
    let log = start_verification(&network, &hash, &[&[0x2A, 0x01]]);

    let verifier = &network.nodes[VERIFIER];
    let prover = network.nodes[PROVER].peer.clone();

    let (_, mut held) = network
        .pump_with(|_, packet| message_of(packet) != MessageId::ChallengeResponse)
        .await;
    assert_eq!(held.len(), 5);
    assert_eq!(verifier.count(CachePrefix::PendingChallenge), 5);

    // One genuine answer; the follow-up is a probe
    let (from, genuine) = held.remove(0);
    network.deliver(&from, &genuine).await;
    let sent = verifier.transport.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(verifier.count(CachePrefix::PendingChallenge), 5);

    let probe: ChallengePayload = Packet::decode(&sent[0].bytes).unwrap().payload().unwrap();
    let forged = Packet::encode(
        MessageId::ChallengeResponse,
        1,
        &ChallengeResponsePayload {
            challenge_hash: digest(&probe.challenge),
            response: vec![0xFF],
        },
    )
    .unwrap();
    verifier.community.on_packet(&prover, &forged).await;

    let calls = log.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, vec![0.0]);
    assert_eq!(verifier.count(CachePrefix::PendingChallenge), 0);
    assert_eq!(verifier.count(CachePrefix::ProvingAttestation), 0);

    // Late honest answers change nothing
    for (from, packet) in &held {
        network.deliver(from, packet).await;
    }
    assert_eq!(log.calls().len(), 1);
    assert!(verifier.transport.sent().is_empty());
}

#[tokio::test]
async fn test_unknown_hash_is_ignored() {
    let network = network(&[0x2A], CommunityConfig::default());
    issue(&network, ATTESTOR, PROVER, "age").await;

    let log = start_verification(&network, &digest(b"never issued"), &[&[0x2A]]);
    // Only the verification request travels
    assert_eq!(network.pump().await, 1);
    assert!(log.calls().is_empty());
    assert_eq!(network.nodes[VERIFIER].count(CachePrefix::ProvingAttestation), 1);
}

#[tokio::test]
async fn test_unauthorized_verification_is_ignored() {
    let network = Network::new(vec![
        TestNode::new(
            9101,
            CommunityConfig::default(),
            StaticAttributeHandler::new().with_attribute("age", &[0x2A]),
        ),
        TestNode::new(9102, CommunityConfig::default(), StaticAttributeHandler::new()),
        TestNode::new(9103, CommunityConfig::default(), StaticAttributeHandler::new()),
    ]);
    let hash = issue(&network, ATTESTOR, PROVER, "age").await;

    let log = start_verification(&network, &hash, &[&[0x2A]]);
    assert_eq!(network.pump().await, 1);
    assert!(log.calls().is_empty());
}

#[tokio::test]
async fn test_expired_verification_never_calls_back() {
    let network = network(&[0x2A], CommunityConfig::default());
    let hash = issue(&network, ATTESTOR, PROVER, "age").await;

    let verifier = &network.nodes[VERIFIER];
    let rx = verifier
        .community
        .verify_attestation(
            network.nodes[PROVER].peer.address,
            hash,
            vec![vec![0x2A]],
            DEFAULT_ID_FORMAT,
        )
        .unwrap();

    // Prover never hears about it
    verifier.transport.take_sent();
    let expired = verifier
        .community
        .sweep_expired(Instant::now() + Duration::from_secs(3600));
    assert_eq!(expired, 2);
    assert!(verifier.community.cache().is_empty());
    assert!(rx.await.is_err());
}

#[tokio::test]
async fn test_verification_request_fails_when_transport_closed() {
    let network = network(&[0x2A], CommunityConfig::default());
    let verifier = &network.nodes[VERIFIER];
    verifier.transport.close();

    let result = verifier.community.verify_attestation_values(
        network.nodes[PROVER].peer.address,
        digest(b"anything"),
        vec![vec![0x2A]],
        DEFAULT_ID_FORMAT,
        |_, _| {},
    );
    assert!(result.is_err());
    assert!(verifier.community.cache().is_empty());
}

#[tokio::test]
async fn test_empty_attestation_completes_without_challenges() {
    let network = network(b"", CommunityConfig::default());
    let hash = issue(&network, ATTESTOR, PROVER, "age").await;

    let log = start_verification(&network, &hash, &[b""]);
    // Request out, blob back, nothing to challenge
    assert_eq!(network.pump().await, 2);

    let calls = log.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, hash);
    let verifier = &network.nodes[VERIFIER];
    assert_eq!(verifier.count(CachePrefix::ProvingAttestation), 0);
    assert_eq!(verifier.count(CachePrefix::PendingChallenge), 0);
}

#[tokio::test]
async fn test_evicted_challenge_is_sent_again() {
    let config = CommunityConfig {
        max_outstanding_challenges: 2,
        honesty_check_threshold: 0,
        ..CommunityConfig::default()
    };
    let challenge_timeout = config.challenge_timeout;
    let network = network(&[0x2A], config);
    let hash = issue(&network, ATTESTOR, PROVER, "age").await;
    let log = start_verification(&network, &hash, &[&[0x2A]]);

    let verifier = &network.nodes[VERIFIER];
    let (_, mut window) = network
        .pump_with(|_, packet| message_of(packet) != MessageId::Challenge)
        .await;
    let first_window_at = Instant::now();
    assert_eq!(window.len(), 2);
    let (_, lost) = window.remove(0);
    let lost: ChallengePayload = Packet::decode(&lost.bytes).unwrap().payload().unwrap();

    // Later challenges must outlive the sweep below
    tokio::time::sleep(Duration::from_millis(100)).await;
    let (from, second) = window.remove(0);
    network.deliver(&from, &second).await;
    let mut responses = 0;
    let (_, mut held) = network
        .pump_with(|_, packet| {
            if message_of(packet) == MessageId::ChallengeResponse {
                responses += 1;
                responses < 2
            } else {
                true
            }
        })
        .await;
    assert_eq!(held.len(), 1);
    assert_eq!(verifier.count(CachePrefix::PendingChallenge), 2);

    let evicted = verifier
        .community
        .sweep_expired(first_window_at + challenge_timeout + Duration::from_millis(50));
    assert_eq!(evicted, 1);
    assert_eq!(verifier.count(CachePrefix::PendingChallenge), 1);
    assert_eq!(verifier.count(CachePrefix::ProvingAttestation), 1);
    assert!(log.calls().is_empty());

    // The next response frees a slot and the lost pair goes out again
    let (from, response) = held.remove(0);
    network.deliver(&from, &response).await;
    let resent = verifier.transport.sent();
    assert_eq!(resent.len(), 1);
    let resent: ChallengePayload = Packet::decode(&resent[0].bytes).unwrap().payload().unwrap();
    assert_eq!(resent.challenge, lost.challenge);

    network.pump().await;
    let calls = log.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, vec![1.0]);
}

#[tokio::test]
async fn test_no_free_challenge_stalls_session() {
    let config = CommunityConfig {
        honesty_check_threshold: 0,
        ..CommunityConfig::default()
    };
    let network = network(&[0x2A], config);
    let hash = issue(&network, ATTESTOR, PROVER, "age").await;
    let log = start_verification(&network, &hash, &[&[0x2A]]);

    let verifier = &network.nodes[VERIFIER];
    let (_, mut held) = network
        .pump_with(|_, packet| message_of(packet) != MessageId::ChallengeResponse)
        .await;
    assert_eq!(held.len(), 4);

    // Every remaining pair is already in flight
    let (from, response) = held.remove(0);
    network.deliver(&from, &response).await;
    assert!(verifier.transport.sent().is_empty());
    assert!(log.calls().is_empty());
    assert_eq!(verifier.count(CachePrefix::PendingChallenge), 3);
    assert_eq!(verifier.count(CachePrefix::ProvingAttestation), 1);

    for (from, response) in &held {
        network.deliver(from, response).await;
    }
    assert_eq!(log.calls().len(), 1);
    assert_eq!(log.calls()[0].1, vec![1.0]);
}
