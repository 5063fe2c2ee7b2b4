//! Shared harness for flow tests.
//!
//! Nodes run in-process on [`RecordingTransport`]s; the [`Network`] pump
//! moves captured datagrams to the node whose address they were sent to.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use zkattest::algorithm::{AlgorithmRegistry, SecretKey, DEFAULT_ID_FORMAT};
use zkattest::cache::CachePrefix;
use zkattest::community::StaticAttributeHandler;
use zkattest::hash::HashKey;
use zkattest::store::{AttestationStore, MemoryAttestationStore};
use zkattest::transport::{Peer, RecordingTransport, SentPacket};
use zkattest::wire::{MessageId, Packet};
use zkattest::{AttestationCommunity, CommunityConfig};

/// One in-process node.
pub struct TestNode {
    pub peer: Peer,
    pub community: Arc<AttestationCommunity>,
    pub transport: RecordingTransport,
    pub store: Arc<dyn AttestationStore>,
    pub handler: StaticAttributeHandler,
}

impl TestNode {
    pub fn new(port: u16, config: CommunityConfig, handler: StaticAttributeHandler) -> Self {
        Self::with_store(port, config, handler, Arc::new(MemoryAttestationStore::new()))
    }

    pub fn with_store(
        port: u16,
        config: CommunityConfig,
        handler: StaticAttributeHandler,
        store: Arc<dyn AttestationStore>,
    ) -> Self {
        let address: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        let peer = Peer::from_address(address);
        let transport = RecordingTransport::new();
        let community = AttestationCommunity::new(
            peer.clone(),
            config,
            AlgorithmRegistry::with_defaults(),
            Arc::new(transport.clone()),
            Arc::clone(&store),
            Arc::new(handler.clone()),
        )
        .unwrap()
        .with_rng_seed(u64::from(port));

        Self {
            peer,
            community: Arc::new(community),
            transport,
            store,
            handler,
        }
    }

    pub fn count(&self, prefix: CachePrefix) -> usize {
        self.community.cache().count(prefix)
    }

    /// Fresh secret key for the default identity format.
    pub fn secret_key(&self) -> SecretKey {
        self.community
            .algorithms()
            .get(DEFAULT_ID_FORMAT)
            .unwrap()
            .generate_secret_key()
            .unwrap()
    }
}

/// In-process network of [`TestNode`]s.
pub struct Network {
    pub nodes: Vec<TestNode>,
}

impl Network {
    pub fn new(nodes: Vec<TestNode>) -> Self {
        Self { nodes }
    }

    /// Deliver everything until the network is quiet.
    pub async fn pump(&self) -> usize {
        let (delivered, _) = self.pump_with(|_, _| true).await;
        delivered
    }

    /// Deliver until quiet; packets `route` rejects are returned undelivered
    /// together with their sender.
    pub async fn pump_with(
        &self,
        mut route: impl FnMut(&Peer, &SentPacket) -> bool,
    ) -> (usize, Vec<(Peer, SentPacket)>) {
        let mut delivered = 0;
        let mut held = Vec::new();

        for _ in 0..100_000 {
            let outbound: Vec<(Peer, SentPacket)> = self
                .nodes
                .iter()
                .flat_map(|node| {
                    let from = node.peer.clone();
                    node.transport
                        .take_sent()
                        .into_iter()
                        .map(move |packet| (from.clone(), packet))
                })
                .collect();
            if outbound.is_empty() {
                return (delivered, held);
            }

            for (from, packet) in outbound {
                if route(&from, &packet) {
                    self.deliver(&from, &packet).await;
                    delivered += 1;
                } else {
                    held.push((from, packet));
                }
            }
        }
        panic!("network did not quiesce");
    }

    /// Hand one captured packet to its destination.
    pub async fn deliver(&self, from: &Peer, packet: &SentPacket) {
        let target = self
            .nodes
            .iter()
            .find(|node| node.peer.address == packet.to)
            .expect("packet addressed to unknown node");
        target.community.on_packet(from, &packet.bytes).await;
    }
}

/// Message id of a captured packet.
pub fn message_of(packet: &SentPacket) -> MessageId {
    Packet::decode(&packet.bytes).unwrap().message().unwrap()
}

/// Records every verification callback.
#[derive(Clone, Default)]
pub struct CallbackLog {
    calls: Arc<Mutex<Vec<(HashKey, Vec<f64>)>>>,
}

impl CallbackLog {
    pub fn callback(&self) -> impl FnOnce(HashKey, Vec<f64>) + Send + 'static {
        let calls = Arc::clone(&self.calls);
        move |hash, certainties| calls.lock().unwrap().push((hash, certainties))
    }

    pub fn calls(&self) -> Vec<(HashKey, Vec<f64>)> {
        self.calls.lock().unwrap().clone()
    }
}

/// Run a complete issuance of `attribute` from `attestor` to `subject`.
pub async fn issue(network: &Network, attestor: usize, subject: usize, attribute: &str) -> HashKey {
    let attestor_peer = network.nodes[attestor].peer.clone();
    let subject_node = &network.nodes[subject];
    let key = subject_node.secret_key();

    subject_node
        .community
        .request_attestation(&attestor_peer, attribute, &key, None)
        .unwrap();
    network.pump().await;

    let completions = subject_node.handler.completions();
    completions
        .iter()
        .rev()
        .find(|c| c.attribute == attribute && c.from_peer.is_some())
        .expect("issuance did not complete")
        .hash
        .clone()
}
