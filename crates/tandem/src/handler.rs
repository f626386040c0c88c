//! Per-connection handler: registration and packet relay.
//!
//! Each paired connection gets its own Tokio task running this handler,
//! plus a writer task that owns every send on the connection. The flow:
//!   1. Queue `Acknowledge` with the assigned identifier
//!   2. Receive `ClientRequestRegistration` → validate the name
//!   3. Add to the roster → queue the registration response
//!   4. Loop: receive packets → dispatch
//!   5. Remove from the roster → close

use std::net::SocketAddr;
use std::sync::Arc;

use tandem_protocol::{KickReason, Packet, PacketType, ParticipantId};
use tandem_session::{
    DisplayName, HandshakeState, Outbound, OutboundReceiver, OutboundSender, Participant,
    ParticipantLink, SessionError, outbound_channel,
};
use tandem_transport::{Connection, Datagram, TcpConnection, TransportError, UdpEndpoint};

use crate::server::{Shared, stopped};
use crate::{Dispatcher, ServerSide, TandemError};

/// Handles a single connection from pairing to close.
pub(crate) async fn handle_connection(
    conn: TcpConnection,
    id: ParticipantId,
    udp_addr: SocketAddr,
    mut state: HandshakeState,
    shared: Arc<Shared>,
    dispatcher: Arc<Dispatcher<ServerSide>>,
) -> Result<(), TandemError> {
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    let (outbound, rx) = outbound_channel();
    let writer = tokio::spawn(write_loop(
        Arc::clone(&conn),
        Arc::clone(&shared.udp),
        udp_addr,
        rx,
    ));

    // --- Step 1: Acknowledge ---
    outbound.send(Outbound::Reliable(Packet::acknowledge(id))).ok();
    state.advance_to(HandshakeState::AwaitingRegistration);

    // --- Step 2-3: Registration ---
    let link = ParticipantLink::new(conn_id, udp_addr, outbound.clone());
    let participant = match register(&conn, id, link, &shared).await {
        Ok(participant) => participant,
        Err(rejection) => {
            state.advance_to(HandshakeState::Rejected);
            if let Some(reason) = rejection.kick {
                tracing::info!(%conn_id, participant_id = %id, %reason, "registration rejected");
                outbound.send(Outbound::Reliable(Packet::kick(reason))).ok();
            }
            outbound.send(Outbound::Close).ok();
            drop(outbound);
            let _ = writer.await;
            return rejection.error.map_or(Ok(()), Err);
        }
    };
    state.advance_to(HandshakeState::Registered);
    tracing::info!(
        %conn_id,
        participant_id = %id,
        name = participant.display_name(),
        %udp_addr,
        "participant registered"
    );

    // --- Step 4: Relay ---
    let result = relay(&conn, &participant, &dispatcher).await;

    // --- Step 5: Cleanup ---
    shared.roster.lock().remove(id);
    finish(outbound, writer).await;
    result
}

/// Why registration didn't produce a participant.
struct Rejection {
    /// Reason to send before closing, if the client is still there.
    kick: Option<KickReason>,
    error: Option<TandemError>,
}

impl Rejection {
    /// Close without a reason and without an error.
    fn quiet() -> Self {
        Self {
            kick: None,
            error: None,
        }
    }

    fn kick(reason: KickReason, error: impl Into<TandemError>) -> Self {
        Self {
            kick: Some(reason),
            error: Some(error.into()),
        }
    }
}

/// Waits for the registration request and admits the participant.
///
/// The response is queued under the roster lock, after the insert, so it
/// precedes any notification about later arrivals. A shutdown before the
/// insert turns the connection away.
async fn register(
    conn: &TcpConnection,
    id: ParticipantId,
    link: ParticipantLink,
    shared: &Shared,
) -> Result<Participant, Rejection> {
    let mut shutdown = shared.shutdown_signal();
    let received = tokio::select! {
        _ = stopped(&mut shutdown) => {
            tracing::debug!(participant_id = %id, "shutdown before registering");
            return Err(Rejection::quiet());
        }
        received = conn.recv() => received,
    };
    let mut request = match received {
        Ok(Some(packet)) => packet,
        Ok(None) => {
            tracing::debug!(participant_id = %id, "closed before registering");
            return Err(Rejection::quiet());
        }
        Err(e) => {
            return Err(Rejection {
                kick: None,
                error: Some(e.into()),
            });
        }
    };

    if let Err(e) = request.expect_type(PacketType::ClientRequestRegistration) {
        tracing::warn!(participant_id = %id, error = %e, "unexpected first packet");
        return Err(Rejection::kick(KickReason::QuestionableActivity, e));
    }
    let name = request
        .read_string()
        .map_err(|e| Rejection::kick(KickReason::QuestionableActivity, e))
        .and_then(|raw| {
            DisplayName::parse(&raw)
                .map_err(|e| Rejection::kick(KickReason::QuestionableActivity, e))
        })?;

    let participant = Participant::connected(id, name, link);
    let mut roster = shared.roster.lock();
    if shared.is_shutting_down() {
        tracing::debug!(participant_id = %id, "shutdown before registering");
        return Err(Rejection::quiet());
    }
    match roster.try_add(participant.clone()) {
        Ok(()) => {}
        Err(e @ SessionError::Full { .. }) => {
            return Err(Rejection::kick(KickReason::ServerFull, e));
        }
        Err(e) => return Err(Rejection::kick(KickReason::QuestionableActivity, e)),
    }
    let response = Packet::registration_response(&roster.manifest());
    match response {
        Ok(response) => {
            participant.send(response).ok();
            Ok(participant)
        }
        Err(e) => {
            // Manifest too large for one packet; undo the add.
            roster.remove(id);
            Err(Rejection {
                kick: Some(KickReason::ServerFull),
                error: Some(e.into()),
            })
        }
    }
}

/// Decodes and dispatches every packet until the stream ends.
///
/// A clean close or a local close (kick, shutdown) is `Ok`. A decode
/// error or a failing handler ends the connection with that error.
async fn relay(
    conn: &TcpConnection,
    participant: &Participant,
    dispatcher: &Dispatcher<ServerSide>,
) -> Result<(), TandemError> {
    let id = participant.id();
    loop {
        let mut packet = match conn.recv().await {
            Ok(Some(packet)) => packet,
            Ok(None) => {
                tracing::info!(participant_id = %id, "connection closed cleanly");
                return Ok(());
            }
            Err(TransportError::ConnectionClosed(_)) => return Ok(()),
            Err(e) => {
                tracing::warn!(participant_id = %id, error = %e, "dropping connection");
                return Err(e.into());
            }
        };

        match dispatcher.dispatch(&mut packet, Some(participant)) {
            Ok(true) => {}
            Ok(false) => tracing::debug!(
                participant_id = %id,
                packet_type = %packet.packet_type(),
                "no handler registered"
            ),
            Err(e) => {
                tracing::warn!(
                    participant_id = %id,
                    error = %e,
                    "handler failed, dropping connection"
                );
                return Err(e.into());
            }
        }
    }
}

/// Queues the final close and waits for the writer to flush.
async fn finish(outbound: OutboundSender, writer: tokio::task::JoinHandle<()>) {
    outbound.send(Outbound::Close).ok();
    drop(outbound);
    if let Err(e) = writer.await {
        tracing::warn!(error = %e, "writer task panicked");
    }
}

/// Owns every send on one connection.
///
/// Reliable packets go out on the stream in queue order. Unreliable ones
/// go to the participant's UDP address; a failure there is logged and
/// ignored. The connection closes when `Close` is dequeued, when all
/// senders are gone, or when a stream write fails.
async fn write_loop(
    conn: Arc<TcpConnection>,
    udp: Arc<UdpEndpoint>,
    udp_addr: SocketAddr,
    mut rx: OutboundReceiver,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            Outbound::Reliable(packet) => {
                if let Err(e) = conn.send(&packet).await {
                    tracing::debug!(conn_id = %conn.id(), error = %e, "write failed");
                    break;
                }
            }
            Outbound::Unreliable(packet) => {
                if let Err(e) = udp.send_to(&packet, udp_addr).await {
                    tracing::debug!(%udp_addr, error = %e, "datagram send failed");
                }
            }
            Outbound::Close => break,
        }
    }
    let _ = conn.close().await;
}
