//! Unified error type for Tandem.

use tandem_protocol::{KickReason, ProtocolError};
use tandem_session::SessionError;
use tandem_transport::TransportError;

use crate::DispatchError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `tandem` meta-crate, you deal with this single error
/// type instead of importing errors from each sub-crate. The `#[from]`
/// attribute on each variant lets `?` convert sub-crate errors.
#[derive(Debug, thiserror::Error)]
pub enum TandemError {
    /// A transport-level error (connect, send, receive, close).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (framing, field decoding, unexpected packet).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (invalid name, roster full, unknown participant).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A dispatch table error (duplicate registration, failing handler).
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The server kicked this client.
    #[error("kicked by server: {0}")]
    Kicked(KickReason),

    /// The client handshake did not finish within the configured timeout.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// The server closed the connection in the middle of the handshake.
    #[error("server closed the connection during the handshake")]
    HandshakeAborted,
}
