//! UDP datagram endpoint: one frame per datagram, no reassembly.

use std::net::SocketAddr;

use tandem_protocol::Packet;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::sync::watch;

use crate::tcp::wait_closed;
use crate::{Datagram, TransportError};

/// Receive buffer size. Anything larger can't arrive in one datagram.
pub const MAX_DATAGRAM_LEN: usize = 65_536;

/// A bound UDP socket that sends and receives framed packets.
///
/// Shared between tasks behind an `Arc`: the receive loop owns the only
/// `recv_from` caller, while any task may `send_to`.
pub struct UdpEndpoint {
    socket: UdpSocket,
    closed: watch::Sender<bool>,
}

impl UdpEndpoint {
    /// Binds a UDP socket to the given address.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        if let Ok(local) = socket.local_addr() {
            tracing::debug!(%local, "UDP endpoint bound");
        }
        let (closed, _) = watch::channel(false);
        Ok(Self { socket, closed })
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

impl Datagram for UdpEndpoint {
    async fn send_to(
        &self,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed("socket closed".into()));
        }
        let frame = packet.encode()?;
        self.socket
            .send_to(&frame, addr)
            .await
            .map_err(TransportError::SendFailed)?;
        Ok(())
    }

    async fn recv_from(&self) -> Result<(Packet, SocketAddr), TransportError> {
        let closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(TransportError::ConnectionClosed("socket closed".into()));
        }
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        let (len, from) = tokio::select! {
            biased;
            _ = wait_closed(closed) => {
                return Err(TransportError::ConnectionClosed("socket closed".into()));
            }
            result = self.socket.recv_from(&mut buf) => {
                result.map_err(TransportError::ReceiveFailed)?
            }
        };
        let packet = Packet::decode_datagram(&buf[..len])
            .map_err(|source| TransportError::BadDatagram { from, source })?;
        Ok((packet, from))
    }

    fn close(&self) {
        if !self.closed.send_replace(true) {
            tracing::debug!("UDP endpoint closed");
        }
    }

    fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.socket
            .local_addr()
            .map_err(TransportError::AcceptFailed)
    }
}
