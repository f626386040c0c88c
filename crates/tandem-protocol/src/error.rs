//! Error types for the protocol layer.
//!
//! Every variant here is fatal to the single frame or datagram being
//! processed, never to the process. What happens next depends on the
//! transport: a TCP stream that produced one of these is no longer
//! framable and gets closed, while a bad UDP datagram is just dropped.

use std::net::SocketAddr;

use crate::PacketType;

/// Errors that can occur while encoding, decoding, or reading packets.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The first two bytes of a frame are not the protocol's magic marker.
    ///
    /// Checked before the length field is trusted, so non-protocol
    /// traffic is rejected without allocating anything.
    #[error("magic mismatch: expected {expected:02x?}, found {found:02x?}")]
    MagicMismatch {
        expected: [u8; 2],
        found: [u8; 2],
    },

    /// The declared frame length is too small to hold the type tag.
    #[error("malformed frame: declared length {length} cannot hold a type tag")]
    MalformedFrame { length: usize },

    /// A read needed more bytes than the buffer holds.
    ///
    /// Raised both by typed payload readers that run past the end of the
    /// payload and by frame decoding when fewer bytes arrived than the
    /// header declared.
    #[error("truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// A datagram's size disagrees with its header, or a buffer carries
    /// bytes past the end of the declared frame.
    #[error("size mismatch: header declares {declared} bytes, got {actual}")]
    SizeMismatch { declared: usize, actual: usize },

    /// A datagram arrived from an address other than the expected peer.
    #[error("datagram from unknown source {addr}")]
    UnknownSource { addr: SocketAddr },

    /// A boolean field held something other than 0 or 1.
    #[error("invalid boolean byte {0:#04x}")]
    InvalidBool(u8),

    /// A string field was not valid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    /// The payload (or a single string field) does not fit the 16-bit
    /// length prefix.
    #[error("payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    /// A roster manifest entry could not be parsed.
    #[error("invalid roster entry: {0:?}")]
    InvalidRoster(String),

    /// The peer sent a well-formed packet that doesn't fit the current
    /// protocol step.
    #[error("unexpected packet: expected {expected}, got {found}")]
    UnexpectedPacket {
        expected: PacketType,
        found: PacketType,
    },
}
