//! Transport Abstractions
//!
//! The protocol engine only ever needs fire-and-forget datagram sends and
//! an already-authenticated view of who sent an inbound packet. Both sides
//! live behind [`Transport`] so flows can be driven in-process by tests
//! through [`RecordingTransport`].

pub mod recording;
pub mod udp;

pub use recording::{RecordingTransport, SentPacket};
pub use udp::UdpTransport;

use crate::hash::digest;
use std::fmt;
use std::net::SocketAddr;

/// Length of a peer id derived from an address.
const PEER_ID_LEN: usize = 20;

/// Overlay identity of a peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(Vec<u8>);

impl PeerId {
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    /// Id for a peer known only by its socket address.
    pub fn from_address(address: &SocketAddr) -> Self {
        let hash = digest(address.to_string().as_bytes());
        Self(hash.as_bytes()[..PEER_ID_LEN].to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// A peer as seen by the protocol: who it is and where to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peer {
    pub id: PeerId,
    pub address: SocketAddr,
}

impl Peer {
    pub fn new(id: PeerId, address: SocketAddr) -> Self {
        Self { id, address }
    }

    pub fn from_address(address: SocketAddr) -> Self {
        Self {
            id: PeerId::from_address(&address),
            address,
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.id.to_string();
        write!(f, "{}@{}", &id[..id.len().min(8)], self.address)
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Packet too large: {size} bytes (max {max})")]
    PacketTooLarge { size: usize, max: usize },

    #[error("Transport closed")]
    Closed,
}

/// Outbound datagram sink.
///
/// `send` never blocks and never waits for delivery; a failed send is the
/// same as a lost datagram to the protocol.
pub trait Transport: Send + Sync {
    fn send(&self, address: SocketAddr, bytes: Vec<u8>) -> TransportResult<()>;
}
