//! UDP transport on a tokio socket.

use super::{Transport, TransportError, TransportResult};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Datagram transport bound to one local socket.
///
/// Sends use `try_send_to`: a full socket buffer drops the datagram rather
/// than suspending the caller.
#[derive(Debug, Clone)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    pub async fn bind(address: SocketAddr) -> TransportResult<Self> {
        let socket = UdpSocket::bind(address).await?;
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Wait for the next inbound datagram.
    pub async fn recv(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddr)> {
        Ok(self.socket.recv_from(buf).await?)
    }
}

impl Transport for UdpTransport {
    fn send(&self, address: SocketAddr, bytes: Vec<u8>) -> TransportResult<()> {
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(TransportError::PacketTooLarge {
                size: bytes.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }
        self.socket.try_send_to(&bytes, address)?;
        Ok(())
    }
}
