//! Integration tests for the server, client, and full handshake flow.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tandem::prelude::*;
use tandem_protocol::{FrameHeader, HEADER_LEN};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

const CHAT: PacketType = PacketType::Application(0x0100);
const PING: PacketType = PacketType::Application(0x0101);

// =========================================================================
// Helpers
// =========================================================================

/// Starts a server on a random loopback port and returns its handle.
async fn start(max: usize, dispatcher: Dispatcher<ServerSide>) -> ServerHandle {
    start_with(ServerBuilder::new().max_participants(max), dispatcher).await
}

async fn start_with(builder: ServerBuilder, dispatcher: Dispatcher<ServerSide>) -> ServerHandle {
    let server = builder
        .bind("127.0.0.1:0".parse().unwrap())
        .build(dispatcher)
        .await
        .expect("server should build");
    let handle = server.handle();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    handle
}

async fn join(server: &ServerHandle, name: &str) -> Result<Client, TandemError> {
    join_with(server, name, Dispatcher::new()).await
}

async fn join_with(
    server: &ServerHandle,
    name: &str,
    dispatcher: Dispatcher<ClientSide>,
) -> Result<Client, TandemError> {
    let mut config = ClientConfig::new(server.local_addr().to_string(), name);
    config.handshake_timeout = Some(Duration::from_secs(5));
    Client::connect(config, dispatcher).await
}

/// Polls `check` until it holds or two seconds pass.
async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

fn names(entries: &[RosterEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("{}@{}", e.id.0, e.display_name))
        .collect::<Vec<_>>()
        .join("|")
}

/// A client that speaks the wire protocol by hand, for sending things
/// the real client never would.
struct RawClient {
    stream: TcpStream,
    udp: UdpSocket,
}

impl RawClient {
    /// Connects and completes discovery, stopping before `Acknowledge`.
    async fn discover(server: SocketAddr) -> Self {
        let stream = TcpStream::connect(server).await.unwrap();
        let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        udp.send_to(&Packet::discovery().encode().unwrap(), server)
            .await
            .unwrap();
        let mut buf = [0u8; 64];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), udp.recv_from(&mut buf))
            .await
            .expect("discovery ack should arrive")
            .unwrap();
        let ack = Packet::decode_datagram(&buf[..n]).unwrap();
        assert_eq!(ack.packet_type(), PacketType::ServerRespondDiscovery);
        Self { stream, udp }
    }

    async fn send(&mut self, packet: &Packet) {
        self.stream
            .write_all(&packet.encode().unwrap())
            .await
            .unwrap();
    }

    /// Next frame, or `None` once the server closes the stream.
    async fn recv(&mut self) -> Option<Packet> {
        let mut header = [0u8; HEADER_LEN];
        let read = tokio::time::timeout(
            Duration::from_secs(2),
            self.stream.read_exact(&mut header),
        )
        .await
        .expect("server should answer or close");
        if read.is_err() {
            return None;
        }
        let header = FrameHeader::parse(&header).unwrap();
        let mut body = vec![0u8; header.body_len];
        self.stream.read_exact(&mut body).await.ok()?;
        Some(Packet::from_body(&body).unwrap())
    }

    /// Reads `Acknowledge`, then registers as `name`.
    async fn register(&mut self, name: &str) -> Packet {
        let ack = self.recv().await.expect("should receive Acknowledge");
        assert_eq!(ack.packet_type(), PacketType::Acknowledge);
        self.send(&Packet::registration_request(name).unwrap()).await;
        self.recv().await.expect("should receive a response")
    }
}

fn kick_reason(mut packet: Packet) -> KickReason {
    assert_eq!(packet.packet_type(), PacketType::ServerKick);
    KickReason::from(packet.read_u32().unwrap())
}

// =========================================================================
// Handshake and roster
// =========================================================================

#[tokio::test]
async fn test_two_participants_then_server_full() {
    let server = start(2, Dispatcher::new()).await;

    let alice = join(&server, "alice").await.expect("alice should register");
    assert_eq!(alice.local_id(), ParticipantId(1));
    assert_eq!(names(&alice.participants()), "1@alice");

    let bob = join(&server, "bob").await.expect("bob should register");
    assert_eq!(bob.local_id(), ParticipantId(2));
    assert_eq!(names(&bob.participants()), "1@alice|2@bob");

    // Alice learns about Bob from the join notification.
    eventually("alice to see bob", || alice.participants().len() == 2).await;
    assert_eq!(names(&alice.participants()), "1@alice|2@bob");

    let third = join(&server, "carol").await;
    assert!(matches!(third, Err(TandemError::Kicked(KickReason::ServerFull))));
    assert_eq!(server.participant_count(), 2);

    server.shutdown();
}

#[tokio::test]
async fn test_capacity_is_rechecked_at_registration() {
    let server = start(1, Dispatcher::new()).await;

    // Both pass the admission check while the roster is still empty.
    let mut first = RawClient::discover(server.local_addr()).await;
    let mut second = RawClient::discover(server.local_addr()).await;

    let response = first.register("alice").await;
    assert_eq!(response.packet_type(), PacketType::ServerResponseRegistration);

    let response = second.register("bob").await;
    assert_eq!(kick_reason(response), KickReason::ServerFull);
    assert!(second.recv().await.is_none(), "connection should close after kick");
    assert_eq!(names(&server.participants()), "1@alice");

    server.shutdown();
}

#[tokio::test]
async fn test_raw_registration_response_carries_manifest() {
    let server = start(4, Dispatcher::new()).await;
    let _alice = join(&server, "alice").await.unwrap();

    let mut raw = RawClient::discover(server.local_addr()).await;
    let mut response = raw.register("bob").await;
    assert_eq!(response.packet_type(), PacketType::ServerResponseRegistration);
    assert_eq!(response.read_string().unwrap(), "1@alice|2@bob");

    server.shutdown();
}

#[tokio::test]
async fn test_invalid_names_are_kicked_for_questionable_activity() {
    let server = start(4, Dispatcher::new()).await;
    let too_long = "x".repeat(21);

    for name in ["ab", too_long.as_str(), "al|ce"] {
        let mut raw = RawClient::discover(server.local_addr()).await;
        let response = raw.register(name).await;
        assert_eq!(
            kick_reason(response),
            KickReason::QuestionableActivity,
            "name {name:?} should be rejected"
        );
        assert!(raw.recv().await.is_none(), "connection should close after kick");
    }

    assert_eq!(server.participant_count(), 0);
    server.shutdown();
}

#[tokio::test]
async fn test_boundary_names_are_accepted() {
    let server = start(4, Dispatcher::new()).await;
    let twenty = "y".repeat(20);
    join(&server, "abc").await.expect("three characters is enough");
    join(&server, &twenty).await.expect("twenty characters fits");
    assert_eq!(server.participant_count(), 2);
    server.shutdown();
}

#[tokio::test]
async fn test_client_validates_name_before_connecting() {
    // Nothing listens here; an invalid name must fail before any I/O.
    let result = connect_client("127.0.0.1", 1, "ab", Dispatcher::new()).await;
    assert!(matches!(
        result,
        Err(TandemError::Session(tandem_session::SessionError::InvalidName { .. }))
    ));
}

#[tokio::test]
async fn test_wrong_first_packet_is_kicked() {
    let server = start(4, Dispatcher::new()).await;
    let mut raw = RawClient::discover(server.local_addr()).await;

    let ack = raw.recv().await.unwrap();
    assert_eq!(ack.packet_type(), PacketType::Acknowledge);
    raw.send(&Packet::new(CHAT)).await;

    let response = raw.recv().await.unwrap();
    assert_eq!(kick_reason(response), KickReason::QuestionableActivity);
    server.shutdown();
}

#[tokio::test]
async fn test_disconnect_broadcasts_leave() {
    let server = start(4, Dispatcher::new()).await;
    let alice = join(&server, "alice").await.unwrap();
    let bob = join(&server, "bob").await.unwrap();
    eventually("alice to see bob", || alice.participants().len() == 2).await;

    bob.disconnect().await.unwrap();

    eventually("server to drop bob", || server.participant_count() == 1).await;
    eventually("alice to drop bob", || alice.participants().len() == 1).await;
    assert_eq!(names(&alice.participants()), "1@alice");
    server.shutdown();
}

#[tokio::test]
async fn test_identifiers_are_not_reused() {
    let server = start(4, Dispatcher::new()).await;
    let alice = join(&server, "alice").await.unwrap();
    assert_eq!(alice.local_id(), ParticipantId(1));
    alice.disconnect().await.unwrap();
    eventually("server to drop alice", || server.participant_count() == 0).await;

    let again = join(&server, "alice").await.unwrap();
    assert_eq!(again.local_id(), ParticipantId(2));
    server.shutdown();
}

#[tokio::test]
async fn test_missing_discovery_times_out_and_server_keeps_accepting() {
    let server = start_with(
        ServerBuilder::new().discovery_timeout(Some(Duration::from_millis(100))),
        Dispatcher::new(),
    )
    .await;

    let mut silent = TcpStream::connect(server.local_addr()).await.unwrap();
    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(2), silent.read(&mut buf))
        .await
        .expect("server should close the silent connection");
    assert!(matches!(read, Ok(0) | Err(_)));

    join(&server, "alice").await.expect("later clients still register");
    server.shutdown();
}

// =========================================================================
// Dispatch
// =========================================================================

#[tokio::test]
async fn test_application_packets_reach_server_handler_with_sender() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let dispatcher = Dispatcher::<ServerSide>::new()
        .with(CHAT, move |packet, from| {
            let from = from.map(|p| p.display_name().to_string());
            log.lock().push((from, packet.read_string()?));
            Ok(())
        })
        .unwrap();
    let server = start(4, dispatcher).await;

    let alice = join(&server, "alice").await.unwrap();
    let mut packet = Packet::new(CHAT);
    packet.write_str("hello").unwrap();
    alice.send(&packet).await.unwrap();

    eventually("chat to arrive", || !seen.lock().is_empty()).await;
    assert_eq!(
        seen.lock()[0],
        (Some("alice".to_string()), "hello".to_string())
    );
    server.shutdown();
}

#[tokio::test]
async fn test_handler_can_broadcast_through_handle() {
    let handle: Arc<OnceLock<ServerHandle>> = Arc::new(OnceLock::new());
    let relay = Arc::clone(&handle);
    let dispatcher = Dispatcher::<ServerSide>::new()
        .with(CHAT, move |packet, _| {
            if let Some(server) = relay.get() {
                server.broadcast(packet);
            }
            Ok(())
        })
        .unwrap();
    let server = start(4, dispatcher).await;
    handle.set(server.clone()).unwrap();

    let heard = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&heard);
    let bob_table = Dispatcher::<ClientSide>::new()
        .with(CHAT, move |packet, from| {
            assert!(from.is_none());
            sink.lock().push(packet.read_string()?);
            Ok(())
        })
        .unwrap();

    let alice = join(&server, "alice").await.unwrap();
    let _bob = join_with(&server, "bob", bob_table).await.unwrap();

    let mut packet = Packet::new(CHAT);
    packet.write_str("hi bob").unwrap();
    alice.send(&packet).await.unwrap();

    eventually("bob to hear alice", || !heard.lock().is_empty()).await;
    assert_eq!(heard.lock()[0], "hi bob");
    server.shutdown();
}

#[tokio::test]
async fn test_unregistered_type_is_ignored_and_connection_survives() {
    let seen = Arc::new(Mutex::new(0u32));
    let count = Arc::clone(&seen);
    let dispatcher = Dispatcher::<ServerSide>::new()
        .with(CHAT, move |_, _| {
            *count.lock() += 1;
            Ok(())
        })
        .unwrap();
    let server = start(4, dispatcher).await;
    let alice = join(&server, "alice").await.unwrap();

    alice.send(&Packet::new(PacketType::Application(0x0999))).await.unwrap();
    alice.send(&Packet::new(CHAT)).await.unwrap();

    eventually("registered packet to arrive", || *seen.lock() == 1).await;
    assert_eq!(server.participant_count(), 1);
    assert!(!alice.is_closed());
    server.shutdown();
}

#[tokio::test]
async fn test_failing_handler_drops_connection() {
    let dispatcher = Dispatcher::<ServerSide>::new()
        .with(CHAT, |packet, _| packet.read_string().map(drop))
        .unwrap();
    let server = start(4, dispatcher).await;
    let alice = join(&server, "alice").await.unwrap();

    // Empty payload: the handler's read_string fails.
    alice.send(&Packet::new(CHAT)).await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), alice.closed())
        .await
        .expect("client should see the connection end");
    eventually("server to drop alice", || server.participant_count() == 0).await;
    server.shutdown();
}

#[tokio::test]
async fn test_bad_magic_closes_only_that_connection() {
    let server = start(4, Dispatcher::new()).await;
    let alice = join(&server, "alice").await.unwrap();

    let mut raw = RawClient::discover(server.local_addr()).await;
    let mut response = raw.register("mallory").await;
    assert_eq!(response.packet_type(), PacketType::ServerResponseRegistration);
    assert_eq!(response.read_string().unwrap(), "1@alice|2@mallory");
    eventually("alice to see mallory", || alice.participants().len() == 2).await;

    raw.stream
        .write_all(&[0xDE, 0xAD, 0x02, 0x00, 0x00, 0x00])
        .await
        .unwrap();
    assert!(raw.recv().await.is_none(), "server should close the stream");

    eventually("alice to see mallory leave", || alice.participants().len() == 1).await;
    assert!(!alice.is_closed());
    server.shutdown();
}

#[tokio::test]
async fn test_bad_datagram_does_not_affect_sessions() {
    let pings = Arc::new(Mutex::new(0u32));
    let count = Arc::clone(&pings);
    let dispatcher = Dispatcher::<ServerSide>::new()
        .with(PING, move |_, from| {
            assert!(from.is_some());
            *count.lock() += 1;
            Ok(())
        })
        .unwrap();
    let server = start(4, dispatcher).await;
    let alice = join(&server, "alice").await.unwrap();

    let garbage = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    garbage
        .send_to(&[0x54, 0x44, 0x09, 0x00, 0x01], server.local_addr())
        .await
        .unwrap();

    alice.send_unreliable(&Packet::new(PING)).await.unwrap();
    eventually("ping over UDP", || *pings.lock() == 1).await;
    server.shutdown();
}

// =========================================================================
// Server handle
// =========================================================================

#[tokio::test]
async fn test_kick_reaches_client_with_reason() {
    let server = start(4, Dispatcher::new()).await;
    let alice = join(&server, "alice").await.unwrap();
    let bob = join(&server, "bob").await.unwrap();
    eventually("alice to see bob", || alice.participants().len() == 2).await;

    server
        .kick(bob.local_id(), KickReason::Other(42))
        .unwrap();

    let reason = tokio::time::timeout(Duration::from_secs(2), bob.closed())
        .await
        .expect("bob should be closed");
    assert_eq!(reason, Some(KickReason::Other(42)));
    eventually("alice to see bob leave", || alice.participants().len() == 1).await;

    assert!(matches!(
        server.kick(ParticipantId(99), KickReason::ServerFull),
        Err(tandem_session::SessionError::NotFound(ParticipantId(99)))
    ));
    server.shutdown();
}

#[tokio::test]
async fn test_send_unreliable_to_participant() {
    let pongs = Arc::new(Mutex::new(0u32));
    let count = Arc::clone(&pongs);
    let table = Dispatcher::<ClientSide>::new()
        .with(PING, move |packet, _| {
            assert_eq!(packet.read_u32()?, 7);
            *count.lock() += 1;
            Ok(())
        })
        .unwrap();

    let server = start(4, Dispatcher::new()).await;
    let alice = join_with(&server, "alice", table).await.unwrap();

    let mut ping = Packet::new(PING);
    ping.write_u32(7);
    server.send_unreliable(alice.local_id(), ping.clone()).unwrap();
    eventually("datagram to arrive", || *pongs.lock() == 1).await;

    server.send(alice.local_id(), ping).unwrap();
    eventually("reliable copy to arrive", || *pongs.lock() == 2).await;
    server.shutdown();
}

#[tokio::test]
async fn test_shutdown_closes_clients() {
    let server = start(4, Dispatcher::new()).await;
    let alice = join(&server, "alice").await.unwrap();

    server.shutdown();
    let reason = tokio::time::timeout(Duration::from_secs(2), alice.closed())
        .await
        .expect("alice should be closed");
    assert_eq!(reason, None);
}

#[tokio::test]
async fn test_shutdown_interrupts_a_pending_discovery() {
    let server = ServerBuilder::new()
        .bind("127.0.0.1:0".parse().unwrap())
        .discovery_timeout(None)
        .build(Dispatcher::new())
        .await
        .unwrap();
    let handle = server.handle();
    let addr = handle.local_addr();
    let run = tokio::spawn(server.run());

    // Accepted, but never announces a UDP address.
    let _silent = TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    handle.shutdown();
    tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("run should return promptly after shutdown")
        .unwrap()
        .unwrap();
    assert!(TcpStream::connect(addr).await.is_err(), "listener should be closed");
}

#[tokio::test]
async fn test_shutdown_turns_away_unregistered_connections() {
    let server = start(4, Dispatcher::new()).await;
    let mut raw = RawClient::discover(server.local_addr()).await;
    let ack = raw.recv().await.expect("should receive Acknowledge");
    assert_eq!(ack.packet_type(), PacketType::Acknowledge);

    server.shutdown();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let request = Packet::registration_request("late").unwrap();
    let _ = raw.stream.write_all(&request.encode().unwrap()).await;

    assert!(raw.recv().await.is_none(), "connection should close unregistered");
    assert_eq!(server.participant_count(), 0);
}

#[tokio::test]
async fn test_duplicate_registration_fails_before_start() {
    let result = Dispatcher::<ServerSide>::new()
        .with(CHAT, |_, _| Ok(()))
        .and_then(|d| d.with(CHAT, |_, _| Ok(())));
    assert!(matches!(result, Err(DispatchError::DuplicateHandler(t)) if t == CHAT));
}
