//! The roster: every registered participant, in registration order.
//!
//! # Notification ordering
//!
//! [`Roster::add`] queues the "joined" notification to everyone already
//! present *before* the newcomer is inserted, and [`Roster::remove`]
//! queues "left" *after* the leaver is gone. Because each participant's
//! outbound queue is FIFO and the server answers roster queries on the
//! same connection, nobody can see the newcomer in a snapshot before they
//! have seen the join.
//!
//! # Locking
//!
//! `Roster` itself is a plain struct. The server wraps it in one mutex
//! and every operation here only pushes onto unbounded channels, so the
//! lock is never held across socket I/O.

use std::net::SocketAddr;

use tandem_protocol::{Packet, ParticipantId, RosterEntry, format_manifest};
use tandem_transport::ConnectionId;

use crate::{Participant, SessionError};

#[derive(Debug, Clone)]
pub struct Roster {
    participants: Vec<Participant>,
    capacity: usize,
}

impl Roster {
    /// Creates an empty roster that admits at most `capacity` participants.
    pub fn new(capacity: usize) -> Self {
        Self {
            participants: Vec::new(),
            capacity,
        }
    }

    /// A roster with no capacity limit. Clients use this to mirror the
    /// server's roster.
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.participants.len() >= self.capacity
    }

    /// Announces `participant` to everyone already registered, then
    /// inserts it.
    ///
    /// # Errors
    /// [`SessionError::AlreadyRegistered`] if the identifier is taken.
    pub fn add(&mut self, participant: Participant) -> Result<(), SessionError> {
        if self.get(participant.id()).is_some() {
            return Err(SessionError::AlreadyRegistered(participant.id()));
        }
        let joined = Packet::player_joined(participant.id(), participant.display_name())?;
        let notified = self.broadcast(&joined);
        tracing::info!(
            participant_id = %participant.id(),
            name = participant.display_name(),
            notified,
            "participant joined"
        );
        self.participants.push(participant);
        Ok(())
    }

    /// Like [`add`](Self::add), but checks capacity first.
    ///
    /// The check and the insert happen under the same borrow, so two
    /// registrations racing for the last slot can't both succeed.
    ///
    /// # Errors
    /// [`SessionError::Full`] at capacity, or whatever `add` returns.
    pub fn try_add(&mut self, participant: Participant) -> Result<(), SessionError> {
        if self.is_full() {
            return Err(SessionError::Full {
                capacity: self.capacity,
            });
        }
        self.add(participant)
    }

    /// Removes the participant and tells everyone left behind.
    ///
    /// Returns `None` without broadcasting if `id` wasn't registered.
    pub fn remove(&mut self, id: ParticipantId) -> Option<Participant> {
        let removed = self.remove_by_id(id)?;
        let notified = self.broadcast(&Packet::player_left(id));
        tracing::info!(participant_id = %id, notified, "participant left");
        Some(removed)
    }

    /// Inserts without any notification. Mirrors on the client side use
    /// this when the server tells them about a newcomer.
    pub fn insert(&mut self, participant: Participant) -> Result<(), SessionError> {
        if self.get(participant.id()).is_some() {
            return Err(SessionError::AlreadyRegistered(participant.id()));
        }
        self.participants.push(participant);
        Ok(())
    }

    /// Removes without any notification.
    pub fn remove_by_id(&mut self, id: ParticipantId) -> Option<Participant> {
        let index = self.participants.iter().position(|p| p.id() == id)?;
        Some(self.participants.remove(index))
    }

    pub fn get(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id() == id)
    }

    /// The participant whose TCP stream is `conn_id`.
    pub fn find_by_tcp(&self, conn_id: ConnectionId) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|p| p.link().is_some_and(|l| l.conn_id() == conn_id))
    }

    /// The participant bound to UDP source `addr` during discovery.
    pub fn find_by_udp(&self, addr: SocketAddr) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|p| p.link().is_some_and(|l| l.udp_addr() == addr))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter()
    }

    /// Queues `packet` on every participant's TCP stream.
    ///
    /// Returns how many participants it was queued for. A participant
    /// whose writer already stopped is skipped; its own connection task
    /// will remove it.
    pub fn broadcast(&self, packet: &Packet) -> usize {
        self.broadcast_filtered(packet, |_| true)
    }

    /// Like [`broadcast`](Self::broadcast), skipping `except`.
    pub fn broadcast_except(&self, packet: &Packet, except: ParticipantId) -> usize {
        self.broadcast_filtered(packet, |p| p.id() != except)
    }

    fn broadcast_filtered(&self, packet: &Packet, include: impl Fn(&Participant) -> bool) -> usize {
        let mut sent = 0;
        for participant in self.participants.iter().filter(|p| include(p)) {
            match participant.send(packet.clone()) {
                Ok(()) => sent += 1,
                Err(e) => tracing::debug!(
                    participant_id = %participant.id(),
                    error = %e,
                    "skipped broadcast"
                ),
            }
        }
        sent
    }

    /// `id@name` entries in registration order.
    pub fn snapshot(&self) -> Vec<RosterEntry> {
        self.participants.iter().map(Participant::entry).collect()
    }

    /// The registration-response manifest, e.g. `1@alice|2@bob`.
    pub fn manifest(&self) -> String {
        format_manifest(&self.snapshot())
    }
}
