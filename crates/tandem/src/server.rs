//! Server builder, accept loop, and UDP receive loop.
//!
//! This is the entry point for running a Tandem server. It ties the
//! layers together: transport → protocol → session → dispatch.
//!
//! ```text
//!   UDP worker ──(discovery sources)──→ DiscoveryQueue
//!                                            │
//!   accept worker ── accept TCP, pop oldest ─┘ → spawn connection task
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tandem_protocol::{KickReason, Packet, PacketType, ParticipantId, RosterEntry};
use tandem_session::{DiscoveryQueue, HandshakeState, Participant, Roster, SessionError};
use tandem_transport::{
    Connection, Datagram, TcpConnection, TcpTransport, Transport, TransportError, UdpEndpoint,
};
use tokio::sync::watch;

use crate::handler::handle_connection;
use crate::{Dispatcher, ServerConfig, ServerSide, TandemError};

/// State shared by every worker and by [`ServerHandle`].
///
/// The dispatch table is kept out of here so that handlers may hold a
/// `ServerHandle` without forming a reference cycle.
pub(crate) struct Shared {
    pub(crate) roster: Mutex<Roster>,
    pub(crate) discovery: DiscoveryQueue,
    pub(crate) udp: Arc<UdpEndpoint>,
    pub(crate) config: ServerConfig,
    local_addr: SocketAddr,
    next_id: AtomicU32,
    shutdown: watch::Sender<bool>,
}

impl Shared {
    /// Identifiers start at 1 and are never handed out twice.
    fn assign_id(&self) -> ParticipantId {
        ParticipantId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Set before the roster is closed out, so a check made under the
    /// roster lock cannot miss a shutdown in progress.
    pub(crate) fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Builder for configuring and starting a server.
///
/// # Example
///
/// ```rust,ignore
/// use tandem::prelude::*;
///
/// let server = ServerBuilder::new()
///     .port(7070)
///     .max_participants(4)
///     .build(dispatcher)
///     .await?;
/// server.run().await
/// ```
pub struct ServerBuilder {
    config: ServerConfig,
}

impl ServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Sets the address to bind both sockets to.
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Keeps the bind IP and changes only the port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.bind_addr.set_port(port);
        self
    }

    pub fn max_participants(mut self, max: usize) -> Self {
        self.config.max_participants = max;
        self
    }

    pub fn discovery_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.discovery_timeout = timeout;
        self
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Binds the TCP listener and the UDP socket on the same port.
    pub async fn build(self, dispatcher: Dispatcher<ServerSide>) -> Result<Server, TandemError> {
        let transport = TcpTransport::bind(self.config.bind_addr).await?;
        let local_addr = transport.local_addr()?;
        let udp = UdpEndpoint::bind(local_addr).await?;
        let (shutdown, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            roster: Mutex::new(Roster::new(self.config.max_participants)),
            discovery: DiscoveryQueue::new(),
            udp: Arc::new(udp),
            config: self.config,
            local_addr,
            next_id: AtomicU32::new(1),
            shutdown,
        });

        Ok(Server {
            transport,
            shared,
            dispatcher: Arc::new(dispatcher),
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound server, ready to [`run`](Self::run).
pub struct Server {
    transport: TcpTransport,
    shared: Arc<Shared>,
    dispatcher: Arc<Dispatcher<ServerSide>>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// The address both sockets are bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    /// A handle for sending to participants while the server runs.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Runs the accept loop until [`ServerHandle::shutdown`] is called.
    ///
    /// Spawns the UDP worker, then accepts TCP connections one at a time.
    /// Each accepted stream is paired with the oldest pending discovery
    /// before the next accept.
    pub async fn run(mut self) -> Result<(), TandemError> {
        tracing::info!(
            addr = %self.shared.local_addr,
            max_participants = self.shared.config.max_participants,
            "Tandem server running"
        );

        let udp_worker = tokio::spawn(udp_loop(
            Arc::clone(&self.shared),
            Arc::clone(&self.dispatcher),
        ));
        let mut shutdown = self.shared.shutdown_signal();

        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => self.admit(conn, &mut shutdown).await,
                    Err(e) => tracing::error!(error = %e, "accept failed"),
                },
            }
        }

        self.shared.udp.close();
        if let Err(e) = udp_worker.await {
            tracing::warn!(error = %e, "UDP worker panicked");
        }
        tracing::info!("Tandem server stopped");
        Ok(())
    }

    /// Pairs a fresh stream with a discovery and hands it to its own task.
    ///
    /// Gives up on the stream if shutdown is requested while waiting.
    async fn admit(&self, conn: TcpConnection, shutdown: &mut watch::Receiver<bool>) {
        let id = self.shared.assign_id();
        let conn_id = conn.id();
        let mut state = HandshakeState::AwaitingDiscovery;

        let config = &self.shared.config;
        let discovery = self
            .shared
            .discovery
            .wait_pop(config.discovery_poll_interval, config.discovery_timeout);
        let paired = tokio::select! {
            _ = stopped(shutdown) => {
                tracing::debug!(%conn_id, "shutdown while awaiting discovery");
                let _ = conn.close().await;
                return;
            }
            paired = discovery => paired,
        };
        let Some(udp_addr) = paired else {
            tracing::warn!(
                %conn_id,
                participant_id = %id,
                "no discovery arrived, dropping connection"
            );
            let _ = conn.close().await;
            return;
        };

        if let Err(e) = self.shared.udp.send_to(&Packet::discovery_ack(), udp_addr).await {
            tracing::warn!(%conn_id, %udp_addr, error = %e, "discovery ack failed");
            let _ = conn.close().await;
            return;
        }
        state.advance_to(HandshakeState::TcpAcknowledged);
        tracing::debug!(%conn_id, participant_id = %id, %udp_addr, "discovery paired");

        // Checked again under the roster lock at registration.
        if self.shared.roster.lock().is_full() {
            state.advance_to(HandshakeState::Rejected);
            tracing::info!(%conn_id, participant_id = %id, "server full, kicking");
            if let Err(e) = conn.send(&Packet::kick(KickReason::ServerFull)).await {
                tracing::debug!(%conn_id, error = %e, "kick not delivered");
            }
            let _ = conn.close().await;
            return;
        }

        let shared = Arc::clone(&self.shared);
        let dispatcher = Arc::clone(&self.dispatcher);
        tokio::spawn(async move {
            let result = handle_connection(conn, id, udp_addr, state, shared, dispatcher).await;
            if let Err(e) = result {
                tracing::debug!(participant_id = %id, error = %e, "connection ended with error");
            }
        });
    }
}

/// Resolves once shutdown has been requested.
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// The server's single UDP worker.
///
/// Discovery datagrams feed the rendezvous queue. Anything else is
/// dispatched if its source is bound to a registered participant and
/// dropped otherwise. A datagram that fails to decode costs only itself.
async fn udp_loop(shared: Arc<Shared>, dispatcher: Arc<Dispatcher<ServerSide>>) {
    loop {
        let (mut packet, from) = match shared.udp.recv_from().await {
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

        if packet.packet_type() == PacketType::ClientDiscovery {
            if shared.roster.lock().find_by_udp(from).is_some() {
                tracing::debug!(%from, "discovery from a bound address, ignoring");
            } else if shared.discovery.push(from) {
                tracing::debug!(%from, "discovery queued");
            }
            continue;
        }

        let sender = shared.roster.lock().find_by_udp(from).cloned();
        let Some(sender) = sender else {
            tracing::debug!(
                %from,
                packet_type = %packet.packet_type(),
                "datagram from unbound address"
            );
            continue;
        };
        match dispatcher.dispatch(&mut packet, Some(&sender)) {
            Ok(true) => {}
            Ok(false) => tracing::debug!(
                participant_id = %sender.id(),
                packet_type = %packet.packet_type(),
                "no handler for datagram"
            ),
            Err(e) => tracing::debug!(
                participant_id = %sender.id(),
                error = %e,
                "datagram handler failed"
            ),
        }
    }
    tracing::debug!("UDP worker stopped");
}

// ---------------------------------------------------------------------------
// ServerHandle
// ---------------------------------------------------------------------------

/// Cheap, cloneable access to a running server.
///
/// Every method only queues onto per-connection channels, so it is safe
/// to call from inside a packet handler.
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<Shared>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    /// Sends `packet` over TCP to every registered participant. Returns
    /// how many it was queued for.
    pub fn broadcast(&self, packet: &Packet) -> usize {
        self.shared.roster.lock().broadcast(packet)
    }

    /// Like [`broadcast`](Self::broadcast), skipping one participant.
    pub fn broadcast_except(&self, packet: &Packet, except: ParticipantId) -> usize {
        self.shared.roster.lock().broadcast_except(packet, except)
    }

    /// Sends `packet` over TCP to one participant.
    pub fn send(&self, id: ParticipantId, packet: Packet) -> Result<(), SessionError> {
        self.with_participant(id, |p| p.send(packet))
    }

    /// Sends `packet` over UDP to the participant's discovery address.
    pub fn send_unreliable(&self, id: ParticipantId, packet: Packet) -> Result<(), SessionError> {
        self.with_participant(id, |p| p.send_unreliable(packet))
    }

    /// Sends a kick with `reason`, then closes the connection. The leave
    /// notification goes out once the connection task has wound down.
    pub fn kick(&self, id: ParticipantId, reason: KickReason) -> Result<(), SessionError> {
        self.with_participant(id, |p| {
            tracing::info!(participant_id = %id, %reason, "kicking participant");
            p.send(Packet::kick(reason))?;
            p.close()
        })
    }

    /// Snapshot of the roster in registration order.
    pub fn participants(&self) -> Vec<RosterEntry> {
        self.shared.roster.lock().snapshot()
    }

    pub fn participant_count(&self) -> usize {
        self.shared.roster.lock().len()
    }

    /// Stops accepting, closes the UDP socket, and closes every
    /// connection. Connections still registering are turned away.
    pub fn shutdown(&self) {
        if self.shared.shutdown.send_replace(true) {
            return;
        }
        tracing::info!("server shutting down");
        self.shared.udp.close();
        for participant in self.shared.roster.lock().iter() {
            let _ = participant.close();
        }
    }

    fn with_participant<T>(
        &self,
        id: ParticipantId,
        f: impl FnOnce(&Participant) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        let roster = self.shared.roster.lock();
        let participant = roster.get(id).ok_or(SessionError::NotFound(id))?;
        f(participant)
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("local_addr", &self.shared.local_addr)
            .finish_non_exhaustive()
    }
}
