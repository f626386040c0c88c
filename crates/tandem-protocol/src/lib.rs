//! Wire protocol for Tandem.
//!
//! This crate defines the bytes that clients and servers exchange:
//!
//! - **Packets** ([`Packet`]): a type tag plus an ordered payload, with
//!   typed writers and cursor-based readers.
//! - **Frames** ([`FrameHeader`], [`Packet::encode`], [`Packet::decode`]):
//!   the magic marker and length prefix that delimit packets on TCP
//!   streams and UDP datagrams.
//! - **Types** ([`PacketType`], [`KickReason`], [`ParticipantId`],
//!   [`RosterEntry`]): the closed vocabulary of the handshake.
//! - **Errors** ([`ProtocolError`]): everything that can be wrong with a
//!   single frame.
//!
//! # Architecture
//!
//! The protocol layer knows nothing about sockets or rosters. Transports
//! call into it to delimit frames; the session and server layers call
//! into it to build and read packets.
//!
//! ```text
//! Transport (bytes) → Protocol (Packet) → Dispatch / Session
//! ```

mod error;
mod frame;
mod packet;
mod types;

pub use error::ProtocolError;
pub use frame::{
    FrameHeader, HEADER_LEN, MAGIC, MAX_PAYLOAD_LEN, MIN_FRAME_LEN, TYPE_TAG_LEN,
};
pub use packet::{MAX_STRING_LEN, Packet};
pub use types::{
    ENTRY_SEPARATOR, ID_SEPARATOR, KickReason, PacketType, ParticipantId,
    RosterEntry, format_manifest, parse_manifest,
};
