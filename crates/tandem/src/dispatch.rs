//! The dispatch table: one handler per packet type.
//!
//! Handlers are registered up front, before the table is handed to a
//! server or client. After that the table is shared read-only between
//! the connection workers, so dispatch needs no lock.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use tandem_protocol::{Packet, PacketType, ProtocolError};
use tandem_session::Participant;

use crate::role::Role;

/// A packet handler.
///
/// Runs synchronously on the worker that received the packet, so it must
/// not block. The participant is the sender as the server knows it; on a
/// client it is always `None`.
pub type Handler =
    Box<dyn Fn(&mut Packet, Option<&Participant>) -> Result<(), ProtocolError> + Send + Sync>;

/// Errors from building or running a dispatch table.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// A second handler was registered for the same type.
    #[error("a handler for {0} is already registered")]
    DuplicateHandler(PacketType),

    /// A handler rejected its packet.
    #[error("handler for {packet_type} failed: {source}")]
    HandlerFailed {
        packet_type: PacketType,
        #[source]
        source: ProtocolError,
    },
}

/// Maps packet types to handlers for one side of the connection.
pub struct Dispatcher<R: Role> {
    handlers: HashMap<u16, Handler>,
    _role: PhantomData<R>,
}

impl<R: Role> Dispatcher<R> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            _role: PhantomData,
        }
    }

    /// Adds the handler for `packet_type`.
    ///
    /// # Errors
    /// [`DispatchError::DuplicateHandler`] if the type already has one.
    /// The existing handler is kept.
    pub fn register<F>(&mut self, packet_type: PacketType, handler: F) -> Result<(), DispatchError>
    where
        F: Fn(&mut Packet, Option<&Participant>) -> Result<(), ProtocolError>
            + Send
            + Sync
            + 'static,
    {
        let tag = packet_type.as_u16();
        if self.handlers.contains_key(&tag) {
            return Err(DispatchError::DuplicateHandler(packet_type));
        }
        self.handlers.insert(tag, Box::new(handler));
        tracing::debug!(role = R::NAME, %packet_type, "handler registered");
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<F>(mut self, packet_type: PacketType, handler: F) -> Result<Self, DispatchError>
    where
        F: Fn(&mut Packet, Option<&Participant>) -> Result<(), ProtocolError>
            + Send
            + Sync
            + 'static,
    {
        self.register(packet_type, handler)?;
        Ok(self)
    }

    pub fn is_registered(&self, packet_type: PacketType) -> bool {
        self.handlers.contains_key(&packet_type.as_u16())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs the handler for the packet's type.
    ///
    /// Returns `Ok(false)` when no handler is registered; the packet is
    /// left untouched and the caller decides whether to log it.
    pub fn dispatch(
        &self,
        packet: &mut Packet,
        participant: Option<&Participant>,
    ) -> Result<bool, DispatchError> {
        let packet_type = packet.packet_type();
        let Some(handler) = self.handlers.get(&packet_type.as_u16()) else {
            return Ok(false);
        };
        handler(packet, participant)
            .map_err(|source| DispatchError::HandlerFailed { packet_type, source })?;
        Ok(true)
    }
}

impl<R: Role> Default for Dispatcher<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Role> fmt::Debug for Dispatcher<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.handlers.keys().copied().collect();
        tags.sort_unstable();
        f.debug_struct("Dispatcher")
            .field("role", &R::NAME)
            .field("tags", &tags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::{ClientSide, ServerSide};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    const CHAT: PacketType = PacketType::Application(0x0100);

    #[test]
    fn test_dispatch_runs_registered_handler() {
        let seen = Arc::new(AtomicU32::new(0));
        let mut table = Dispatcher::<ServerSide>::new();
        let counter = Arc::clone(&seen);
        table
            .register(CHAT, move |packet, _| {
                counter.store(packet.read_u32()?, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let mut packet = Packet::new(CHAT);
        packet.write_u32(99);
        assert!(table.dispatch(&mut packet, None).unwrap());
        assert_eq!(seen.load(Ordering::SeqCst), 99);
    }

    #[test]
    fn test_duplicate_registration_rejected_and_first_kept() {
        let mut table = Dispatcher::<ClientSide>::new()
            .with(CHAT, |_, _| Ok(()))
            .unwrap();
        let err = table
            .register(CHAT, |_, _| Err(ProtocolError::InvalidUtf8))
            .unwrap_err();
        assert!(matches!(err, DispatchError::DuplicateHandler(t) if t == CHAT));
        assert_eq!(table.len(), 1);

        let mut packet = Packet::new(CHAT);
        assert!(table.dispatch(&mut packet, None).unwrap());
    }

    #[test]
    fn test_unregistered_type_is_not_handled() {
        let table = Dispatcher::<ServerSide>::new()
            .with(CHAT, |_, _| Ok(()))
            .unwrap();
        let mut packet = Packet::new(PacketType::Application(0x0200));
        packet.write_u32(1);
        assert!(!table.dispatch(&mut packet, None).unwrap());
        assert_eq!(packet.position(), 0);
    }

    #[test]
    fn test_handler_failure_names_packet_type() {
        let table = Dispatcher::<ServerSide>::new()
            .with(CHAT, |packet, _| packet.read_string().map(drop))
            .unwrap();
        let mut packet = Packet::new(CHAT);
        let err = table.dispatch(&mut packet, None).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::HandlerFailed {
                packet_type: CHAT,
                source: ProtocolError::Truncated { .. }
            }
        ));
    }

    #[test]
    fn test_builtin_types_can_be_observed() {
        let table = Dispatcher::<ClientSide>::new()
            .with(PacketType::ServerNotifyPlayerJoined, |_, _| Ok(()))
            .unwrap();
        assert!(table.is_registered(PacketType::ServerNotifyPlayerJoined));
        assert!(!table.is_registered(PacketType::ServerNotifyPlayerLeft));
    }
}
