//! Participant bookkeeping for Tandem.
//!
//! This crate holds the state a server keeps about who is connected and
//! how far along each connection is:
//!
//! 1. **Roster** ([`Roster`]): registered participants, with join and
//!    leave notifications queued to everyone else.
//! 2. **Participants** ([`Participant`], [`ParticipantLink`]): identity
//!    plus the outbound channel to the connection's writer task.
//! 3. **Names** ([`DisplayName`]): the shared validation rule.
//! 4. **Rendezvous** ([`DiscoveryQueue`]): pairs UDP discovery sources
//!    with newly accepted TCP streams.
//! 5. **Handshake** ([`HandshakeState`]): the per-connection state machine.
//!
//! # How it fits in the stack
//!
//! ```text
//! Server / Client drivers (above)  ← own sockets and tasks
//!     ↕
//! Session Layer (this crate)  ← roster, names, rendezvous, handshake states
//!     ↕
//! Protocol + Transport (below)  ← Packet, ParticipantId, ConnectionId
//! ```
//!
//! Nothing here performs I/O. Sending means pushing an [`Outbound`] onto
//! a channel that a writer task drains.

mod error;
mod handshake;
mod name;
mod participant;
mod rendezvous;
mod roster;

pub use error::SessionError;
pub use handshake::HandshakeState;
pub use name::{DisplayName, MAX_NAME_LEN, MIN_NAME_LEN};
pub use participant::{
    Outbound, OutboundReceiver, OutboundSender, Participant, ParticipantLink, outbound_channel,
};
pub use rendezvous::DiscoveryQueue;
pub use roster::Roster;
