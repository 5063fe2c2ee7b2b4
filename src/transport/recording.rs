//! Recording transport for tests.
//!
//! Captures every outbound datagram instead of sending it, so tests can
//! assert on traffic and pump packets between in-process nodes.

use super::{Transport, TransportError, TransportResult};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

/// An outbound datagram captured by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPacket {
    pub to: SocketAddr,
    pub bytes: Vec<u8>,
}

#[derive(Default)]
struct RecordingState {
    sent: Vec<SentPacket>,
    closed: bool,
}

/// Transport that records instead of sending.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far.
    pub fn sent(&self) -> Vec<SentPacket> {
        self.lock().sent.clone()
    }

    /// Drain the outbound queue.
    pub fn take_sent(&self) -> Vec<SentPacket> {
        std::mem::take(&mut self.lock().sent)
    }

    pub fn count(&self) -> usize {
        self.lock().sent.len()
    }

    /// Make every later send fail with [`TransportError::Closed`].
    pub fn close(&self) {
        self.lock().closed = true;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RecordingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for RecordingTransport {
    fn send(&self, address: SocketAddr, bytes: Vec<u8>) -> TransportResult<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        state.sent.push(SentPacket { to: address, bytes });
        Ok(())
    }
}
