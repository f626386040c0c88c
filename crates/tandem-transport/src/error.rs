use std::net::SocketAddr;

use tandem_protocol::ProtocolError;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed, locally or by the peer.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Connecting to the remote peer failed.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The bytes on the wire could not be framed.
    #[error(transparent)]
    Framing(#[from] ProtocolError),

    /// A single datagram failed to decode. Only that datagram is lost.
    #[error("bad datagram from {from}: {source}")]
    BadDatagram {
        from: SocketAddr,
        #[source]
        source: ProtocolError,
    },
}
