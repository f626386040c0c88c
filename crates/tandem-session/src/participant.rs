//! Participants and the outbound channel that reaches their connection.

use std::net::SocketAddr;

use tandem_protocol::{Packet, ParticipantId, RosterEntry};
use tandem_transport::ConnectionId;
use tokio::sync::mpsc;

use crate::{DisplayName, SessionError};

/// A message queued for a participant's connection writer.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Send over the participant's TCP stream.
    Reliable(Packet),
    /// Send over UDP to the participant's bound address.
    Unreliable(Packet),
    /// Flush everything queued before this, then close the connection.
    Close,
}

/// Channel sender for delivering outbound messages to one connection.
///
/// Unbounded so that pushing never waits; the roster may be locked while
/// a broadcast enqueues.
pub type OutboundSender = mpsc::UnboundedSender<Outbound>;

/// Receiving end, owned by the connection's writer task.
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

/// Creates the channel pair for a new connection.
pub fn outbound_channel() -> (OutboundSender, OutboundReceiver) {
    mpsc::unbounded_channel()
}

/// The server's handle on a participant's transports.
///
/// Only the server holds links. The UDP address is fixed at discovery and
/// never changes for the life of the connection.
#[derive(Debug, Clone)]
pub struct ParticipantLink {
    conn_id: ConnectionId,
    udp_addr: SocketAddr,
    outbound: OutboundSender,
}

impl ParticipantLink {
    pub fn new(conn_id: ConnectionId, udp_addr: SocketAddr, outbound: OutboundSender) -> Self {
        Self {
            conn_id,
            udp_addr,
            outbound,
        }
    }

    pub fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    /// Queues a message. Returns `false` if the writer has already stopped.
    pub fn push(&self, msg: Outbound) -> bool {
        self.outbound.send(msg).is_ok()
    }
}

/// One registered member of a roster.
///
/// On the server every participant carries a [`ParticipantLink`]. On a
/// client the roster is a mirror of the server's, so entries have no link.
#[derive(Debug, Clone)]
pub struct Participant {
    id: ParticipantId,
    display_name: String,
    link: Option<ParticipantLink>,
}

impl Participant {
    /// A participant as the server sees it, reachable through `link`.
    pub fn connected(id: ParticipantId, display_name: DisplayName, link: ParticipantLink) -> Self {
        Self {
            id,
            display_name: display_name.into_inner(),
            link: Some(link),
        }
    }

    /// A participant known only from a manifest or join notification.
    pub fn remote(entry: RosterEntry) -> Self {
        Self {
            id: entry.id,
            display_name: entry.display_name,
            link: None,
        }
    }

    pub fn id(&self) -> ParticipantId {
        self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn link(&self) -> Option<&ParticipantLink> {
        self.link.as_ref()
    }

    /// The `id@name` entry used in manifests.
    pub fn entry(&self) -> RosterEntry {
        RosterEntry::new(self.id, self.display_name.clone())
    }

    /// Queues `packet` for the participant's TCP stream.
    pub fn send(&self, packet: Packet) -> Result<(), SessionError> {
        self.push(Outbound::Reliable(packet))
    }

    /// Queues `packet` as a UDP datagram to the participant's bound address.
    pub fn send_unreliable(&self, packet: Packet) -> Result<(), SessionError> {
        self.push(Outbound::Unreliable(packet))
    }

    /// Asks the connection writer to close after flushing.
    pub fn close(&self) -> Result<(), SessionError> {
        self.push(Outbound::Close)
    }

    fn push(&self, msg: Outbound) -> Result<(), SessionError> {
        match &self.link {
            Some(link) if link.push(msg) => Ok(()),
            _ => Err(SessionError::NotConnected(self.id)),
        }
    }
}
