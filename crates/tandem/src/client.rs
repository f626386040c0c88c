//! Client connection: handshake, roster mirror, and read workers.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use parking_lot::Mutex;
use tandem_protocol::{
    KickReason, Packet, PacketType, ParticipantId, ProtocolError, RosterEntry, parse_manifest,
};
use tandem_session::{DisplayName, Participant, Roster};
use tandem_transport::{Connection, Datagram, TcpConnection, TransportError, UdpEndpoint};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::{ClientConfig, ClientSide, Dispatcher, TandemError};

/// State the read workers update and the [`Client`] reads.
struct ClientShared {
    roster: Mutex<Roster>,
    kicked: Mutex<Option<KickReason>>,
}

/// A registered connection to a server.
///
/// Dropping the client does not close it; call
/// [`disconnect`](Self::disconnect).
pub struct Client {
    local_id: ParticipantId,
    display_name: DisplayName,
    conn: Arc<TcpConnection>,
    udp: Arc<UdpEndpoint>,
    server_udp: SocketAddr,
    shared: Arc<ClientShared>,
    done: watch::Receiver<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl Client {
    /// Runs the handshake and starts the read workers.
    ///
    /// The display name is validated before anything touches the network.
    ///
    /// # Errors
    /// - [`TandemError::Session`] if the name is invalid
    /// - [`TandemError::Kicked`] if the server refuses the registration
    /// - [`TandemError::HandshakeTimeout`] if `handshake_timeout` elapses
    /// - transport and protocol errors from the exchange itself
    pub async fn connect(
        config: ClientConfig,
        dispatcher: Dispatcher<ClientSide>,
    ) -> Result<Self, TandemError> {
        let display_name = DisplayName::parse(&config.display_name)?;

        let pending = handshake(&config.server_addr, &display_name);
        let registered = match config.handshake_timeout {
            Some(limit) => tokio::time::timeout(limit, pending)
                .await
                .map_err(|_| TandemError::HandshakeTimeout)??,
            None => pending.await?,
        };

        tracing::info!(
            participant_id = %registered.local_id,
            name = %display_name,
            participants = registered.roster.len(),
            "registered with server"
        );

        let shared = Arc::new(ClientShared {
            roster: Mutex::new(registered.roster),
            kicked: Mutex::new(None),
        });
        let conn = Arc::new(registered.conn);
        let udp = Arc::new(registered.udp);
        let dispatcher = Arc::new(dispatcher);
        let (done_tx, done) = watch::channel(false);

        let tcp_worker = tokio::spawn(tcp_loop(
            Arc::clone(&conn),
            Arc::clone(&udp),
            Arc::clone(&shared),
            Arc::clone(&dispatcher),
            done_tx,
        ));
        let udp_worker = tokio::spawn(udp_loop(
            Arc::clone(&udp),
            registered.server_udp,
            dispatcher,
        ));

        Ok(Self {
            local_id: registered.local_id,
            display_name,
            conn,
            udp,
            server_udp: registered.server_udp,
            shared,
            done,
            workers: vec![tcp_worker, udp_worker],
        })
    }

    /// The identifier the server assigned to this client.
    pub fn local_id(&self) -> ParticipantId {
        self.local_id
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_str()
    }

    /// Snapshot of the mirrored roster, including this client.
    pub fn participants(&self) -> Vec<RosterEntry> {
        self.shared.roster.lock().snapshot()
    }

    /// Sends `packet` to the server over TCP.
    pub async fn send(&self, packet: &Packet) -> Result<(), TandemError> {
        self.conn.send(packet).await?;
        Ok(())
    }

    /// Sends `packet` to the server as a UDP datagram.
    pub async fn send_unreliable(&self, packet: &Packet) -> Result<(), TandemError> {
        self.udp.send_to(packet, self.server_udp).await?;
        Ok(())
    }

    /// `true` once the session has ended for any reason.
    pub fn is_closed(&self) -> bool {
        *self.done.borrow()
    }

    /// The kick reason, if the server kicked this client.
    pub fn kick_reason(&self) -> Option<KickReason> {
        *self.shared.kicked.lock()
    }

    /// Waits until the session ends and returns the kick reason, if any.
    pub async fn closed(&self) -> Option<KickReason> {
        let mut done = self.done.clone();
        let _ = done.wait_for(|closed| *closed).await;
        self.kick_reason()
    }

    /// Closes both transports and waits for the read workers to stop.
    pub async fn disconnect(self) -> Result<(), TandemError> {
        tracing::info!(participant_id = %self.local_id, "disconnecting");
        self.conn.close().await?;
        self.udp.close();
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "client worker panicked");
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("local_id", &self.local_id)
            .field("display_name", &self.display_name)
            .field("server_udp", &self.server_udp)
            .finish_non_exhaustive()
    }
}

/// What a successful handshake hands back.
struct Registered {
    conn: TcpConnection,
    udp: UdpEndpoint,
    server_udp: SocketAddr,
    local_id: ParticipantId,
    roster: Roster,
}

/// Discovery, acknowledgment, and registration, in that order.
///
/// Both transports are closed again if any step fails.
async fn handshake(server_addr: &str, name: &DisplayName) -> Result<Registered, TandemError> {
    let conn = TcpConnection::connect(server_addr).await?;
    let server_udp = conn.peer_addr();
    let local = match server_udp {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    };
    let udp = match UdpEndpoint::bind(local).await {
        Ok(udp) => udp,
        Err(e) => {
            let _ = conn.close().await;
            return Err(e.into());
        }
    };

    match exchange(&conn, &udp, server_udp, name).await {
        Ok((local_id, roster)) => Ok(Registered {
            conn,
            udp,
            server_udp,
            local_id,
            roster,
        }),
        Err(e) => {
            let _ = conn.close().await;
            udp.close();
            Err(e)
        }
    }
}

async fn exchange(
    conn: &TcpConnection,
    udp: &UdpEndpoint,
    server_udp: SocketAddr,
    name: &DisplayName,
) -> Result<(ParticipantId, Roster), TandemError> {
    udp.send_to(&Packet::discovery(), server_udp).await?;
    await_discovery_ack(udp, server_udp).await?;
    tracing::debug!(%server_udp, "discovery acknowledged");

    let mut ack = recv_or_kick(conn).await?;
    ack.expect_type(PacketType::Acknowledge)?;
    let local_id = ParticipantId(ack.read_u32()?);

    conn.send(&Packet::registration_request(name.as_str())?).await?;
    let mut response = recv_or_kick(conn).await?;
    response.expect_type(PacketType::ServerResponseRegistration)?;
    let manifest = response.read_string()?;

    let mut roster = Roster::unbounded();
    for entry in parse_manifest(&manifest)? {
        roster.insert(Participant::remote(entry))?;
    }
    Ok((local_id, roster))
}

/// Waits for the discovery acknowledgment from the server's address.
/// Datagrams from anywhere else are logged and skipped.
async fn await_discovery_ack(
    udp: &UdpEndpoint,
    server_udp: SocketAddr,
) -> Result<(), TandemError> {
    loop {
        match udp.recv_from().await {
            Ok((packet, from)) if from != server_udp => {
                let e = ProtocolError::UnknownSource { addr: from };
                tracing::debug!(
                    packet_type = %packet.packet_type(),
                    error = %e,
                    "ignoring datagram"
                );
            }
            Ok((packet, _)) if packet.packet_type() == PacketType::ServerRespondDiscovery => {
                return Ok(());
            }
            Ok((packet, _)) => {
                tracing::debug!(
                    packet_type = %packet.packet_type(),
                    "datagram before discovery ack"
                );
            }
            Err(TransportError::BadDatagram { from, source }) => {
                tracing::debug!(%from, error = %source, "dropping bad datagram");
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Receives the next handshake packet, turning a kick into an error.
async fn recv_or_kick(conn: &TcpConnection) -> Result<Packet, TandemError> {
    let mut packet = conn.recv().await?.ok_or(TandemError::HandshakeAborted)?;
    if packet.packet_type() == PacketType::ServerKick {
        let reason = KickReason::from(packet.read_u32()?);
        tracing::info!(%reason, "kicked during handshake");
        return Err(TandemError::Kicked(reason));
    }
    Ok(packet)
}

/// Reads the TCP stream until it ends.
///
/// Join, leave, and kick notifications update the mirror first; then
/// every packet, built-in or not, is rewound and offered to the
/// application's handlers.
async fn tcp_loop(
    conn: Arc<TcpConnection>,
    udp: Arc<UdpEndpoint>,
    shared: Arc<ClientShared>,
    dispatcher: Arc<Dispatcher<ClientSide>>,
    done: watch::Sender<bool>,
) {
    loop {
        let mut packet = match conn.recv().await {
            Ok(Some(packet)) => packet,
            Ok(None) => {
                tracing::info!("server closed the connection");
                break;
            }
            Err(TransportError::ConnectionClosed(_)) => break,
            Err(e) => {
                tracing::warn!(error = %e, "dropping connection");
                break;
            }
        };

        let kicked = match apply_notification(&shared, &mut packet) {
            Ok(kicked) => kicked,
            Err(e) => {
                tracing::warn!(packet_type = %packet.packet_type(), error = %e, "bad notification");
                break;
            }
        };
        packet.rewind();

        match dispatcher.dispatch(&mut packet, None) {
            Ok(true) => {}
            Ok(false) => {
                if let PacketType::Application(_) = packet.packet_type() {
                    tracing::debug!(packet_type = %packet.packet_type(), "no handler registered");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "handler failed, dropping connection");
                break;
            }
        }

        if kicked {
            break;
        }
    }

    let _ = conn.close().await;
    udp.close();
    done.send_replace(true);
}

/// Applies a roster notification to the mirror. Returns `true` for a kick.
fn apply_notification(shared: &ClientShared, packet: &mut Packet) -> Result<bool, TandemError> {
    match packet.packet_type() {
        PacketType::ServerNotifyPlayerJoined => {
            let id = ParticipantId(packet.read_u32()?);
            let name = packet.read_string()?;
            tracing::info!(participant_id = %id, %name, "participant joined");
            let joined = Participant::remote(RosterEntry::new(id, name));
            if let Err(e) = shared.roster.lock().insert(joined) {
                tracing::debug!(error = %e, "repeated join notification");
            }
        }
        PacketType::ServerNotifyPlayerLeft => {
            let id = ParticipantId(packet.read_u32()?);
            tracing::info!(participant_id = %id, "participant left");
            shared.roster.lock().remove_by_id(id);
        }
        PacketType::ServerKick => {
            let reason = KickReason::from(packet.read_u32()?);
            tracing::info!(%reason, "kicked by server");
            *shared.kicked.lock() = Some(reason);
            return Ok(true);
        }
        _ => {}
    }
    Ok(false)
}

/// Reads datagrams from the server and dispatches them.
async fn udp_loop(
    udp: Arc<UdpEndpoint>,
    server_udp: SocketAddr,
    dispatcher: Arc<Dispatcher<ClientSide>>,
) {
    loop {
        let (mut packet, from) = match udp.recv_from().await {
            Ok(received) => received,
            Err(TransportError::BadDatagram { from, source }) => {
                tracing::debug!(%from, error = %source, "dropping bad datagram");
                continue;
            }
            Err(TransportError::ConnectionClosed(_)) => break,
            Err(e) => {
                tracing::warn!(error = %e, "UDP receive failed");
                continue;
            }
        };
        if from != server_udp {
            let e = ProtocolError::UnknownSource { addr: from };
            tracing::debug!(error = %e, "ignoring datagram");
            continue;
        }
        match dispatcher.dispatch(&mut packet, None) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(packet_type = %packet.packet_type(), "no handler for datagram")
            }
            Err(e) => tracing::debug!(error = %e, "datagram handler failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> ClientShared {
        ClientShared {
            roster: Mutex::new(Roster::unbounded()),
            kicked: Mutex::new(None),
        }
    }

    #[test]
    fn test_repeated_join_keeps_the_session() {
        let shared = shared();
        let mut joined = Packet::player_joined(ParticipantId(2), "bob").unwrap();
        assert!(!apply_notification(&shared, &mut joined).unwrap());

        joined.rewind();
        assert!(!apply_notification(&shared, &mut joined).unwrap());
        assert_eq!(shared.roster.lock().len(), 1);
    }

    #[test]
    fn test_leave_and_kick_update_the_mirror() {
        let shared = shared();
        let mut joined = Packet::player_joined(ParticipantId(3), "carol").unwrap();
        apply_notification(&shared, &mut joined).unwrap();

        let mut left = Packet::player_left(ParticipantId(3));
        assert!(!apply_notification(&shared, &mut left).unwrap());
        assert!(shared.roster.lock().is_empty());

        let mut kick = Packet::kick(KickReason::QuestionableActivity);
        assert!(apply_notification(&shared, &mut kick).unwrap());
        assert_eq!(*shared.kicked.lock(), Some(KickReason::QuestionableActivity));
    }
}
