//! Transport abstraction layer for Tandem.
//!
//! A Tandem session rides on two transports at once:
//!
//! - a reliable byte stream ([`Transport`] / [`Connection`], implemented
//!   over TCP by [`TcpTransport`] and [`TcpConnection`]) that carries the
//!   handshake and every reliable packet, and
//! - an unreliable datagram socket ([`Datagram`], implemented over UDP by
//!   [`UdpEndpoint`]) used for discovery and fire-and-forget traffic.
//!
//! Both speak whole [`Packet`]s: the stream side reads the frame header
//! first and then exactly the declared body, the datagram side expects
//! one frame per datagram.
//!
//! # Cancellation
//!
//! `close` may be called from any task. A `recv` blocked on the same
//! handle wakes up immediately with [`TransportError::ConnectionClosed`];
//! it does not wait for the peer.

#![allow(async_fn_in_trait)]

mod error;
mod tcp;
mod udp;

pub use error::TransportError;
pub use tcp::{TcpConnection, TcpTransport};
pub use udp::{MAX_DATAGRAM_LEN, UdpEndpoint};

use std::fmt;
use std::net::SocketAddr;

use tandem_protocol::Packet;

/// Opaque identifier for a stream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming stream connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, TransportError>;

    /// The address this transport is listening on.
    fn local_addr(&self) -> Result<SocketAddr, TransportError>;
}

/// A single reliable, ordered connection that carries framed packets.
pub trait Connection: Send + Sync + 'static {
    /// Frames and sends one packet.
    async fn send(&self, packet: &Packet) -> Result<(), TransportError>;

    /// Receives the next packet from the remote peer.
    ///
    /// Returns `Ok(None)` when the peer closes the stream cleanly between
    /// frames. A frame that fails to decode is an error: the stream can't
    /// be resynchronized after it.
    async fn recv(&self) -> Result<Option<Packet>, TransportError>;

    /// Closes the connection and wakes any pending `recv`.
    async fn close(&self) -> Result<(), TransportError>;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// The remote peer's address.
    fn peer_addr(&self) -> SocketAddr;
}

/// An unreliable datagram socket that carries one packet per datagram.
pub trait Datagram: Send + Sync + 'static {
    /// Frames `packet` into a single datagram and sends it to `addr`.
    async fn send_to(
        &self,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), TransportError>;

    /// Receives the next datagram and decodes it.
    ///
    /// A datagram that fails to decode comes back as
    /// [`TransportError::BadDatagram`]; the socket itself is still fine.
    async fn recv_from(&self) -> Result<(Packet, SocketAddr), TransportError>;

    /// Closes the socket and wakes any pending `recv_from`.
    fn close(&self);

    /// The local address the socket is bound to.
    fn local_addr(&self) -> Result<SocketAddr, TransportError>;
}
