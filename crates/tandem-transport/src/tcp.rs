//! TCP stream transport carrying length-prefixed frames.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tandem_protocol::{FrameHeader, HEADER_LEN, Packet};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{Mutex, watch};

use crate::{Connection, ConnectionId, Transport, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A TCP [`Transport`] that listens for incoming connections.
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    /// Binds a new TCP transport to the given address.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        if let Ok(local) = listener.local_addr() {
            tracing::info!(%local, "TCP transport listening");
        }
        Ok(Self { listener })
    }
}

impl Transport for TcpTransport {
    type Connection = TcpConnection;

    async fn accept(&mut self) -> Result<Self::Connection, TransportError> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;
        let conn = TcpConnection::from_stream(stream, addr)?;
        tracing::debug!(id = %conn.id, %addr, "accepted TCP connection");
        Ok(conn)
    }

    fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.listener
            .local_addr()
            .map_err(TransportError::AcceptFailed)
    }
}

/// A single TCP connection.
///
/// The read and write halves are locked separately, so one task can sit
/// in `recv` while others send.
pub struct TcpConnection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    closed: watch::Sender<bool>,
}

impl TcpConnection {
    /// Opens a connection to a remote listener.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(TransportError::ConnectFailed)?;
        let peer = stream.peer_addr().map_err(TransportError::ConnectFailed)?;
        let conn = Self::from_stream(stream, peer)?;
        tracing::debug!(id = %conn.id, %peer, "connected over TCP");
        Ok(conn)
    }

    fn from_stream(
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<Self, TransportError> {
        // Small handshake packets must not sit in Nagle's buffer.
        stream
            .set_nodelay(true)
            .map_err(TransportError::AcceptFailed)?;
        let (reader, writer) = stream.into_split();
        let (closed, _) = watch::channel(false);
        Ok(Self {
            id: ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)),
            peer_addr,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed,
        })
    }

    /// Returns `true` once `close` has been called.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

impl Connection for TcpConnection {
    async fn send(&self, packet: &Packet) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed("closed locally".into()));
        }
        let frame = packet.encode()?;
        self.writer
            .lock()
            .await
            .write_all(&frame)
            .await
            .map_err(TransportError::SendFailed)
    }

    async fn recv(&self) -> Result<Option<Packet>, TransportError> {
        let closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(TransportError::ConnectionClosed("closed locally".into()));
        }
        let mut reader = self.reader.lock().await;
        tokio::select! {
            biased;
            _ = wait_closed(closed) => {
                Err(TransportError::ConnectionClosed("closed locally".into()))
            }
            result = read_frame(&mut *reader) => result,
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.send_replace(true) {
            return Ok(());
        }
        tracing::debug!(id = %self.id, peer = %self.peer_addr, "closing TCP connection");
        // The peer may already be gone; that is still a closed connection.
        let _ = self.writer.lock().await.shutdown().await;
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

/// Resolves once the watched flag turns `true` or its sender is gone.
pub(crate) async fn wait_closed(mut closed: watch::Receiver<bool>) {
    while !*closed.borrow_and_update() {
        if closed.changed().await.is_err() {
            return;
        }
    }
}

/// Reads one frame: exactly the header, then exactly the declared body.
///
/// `Ok(None)` means the peer closed the stream before the first byte of
/// a new frame. Closing in the middle of a frame is an error.
async fn read_frame<R>(reader: &mut R) -> Result<Option<Packet>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let first = reader
        .read(&mut header)
        .await
        .map_err(TransportError::ReceiveFailed)?;
    if first == 0 {
        return Ok(None);
    }
    reader
        .read_exact(&mut header[first..])
        .await
        .map_err(TransportError::ReceiveFailed)?;

    let header = FrameHeader::parse(&header)?;
    let mut body = vec![0u8; header.body_len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(TransportError::ReceiveFailed)?;

    Ok(Some(Packet::from_body(&body)?))
}
