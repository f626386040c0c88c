//! Error types for the session layer.

use tandem_protocol::{ParticipantId, ProtocolError};

/// Errors that can occur while admitting or tracking participants.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The requested display name breaks the naming rules. The server
    /// answers this with a `QuestionableActivity` kick.
    #[error("invalid display name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// The roster already holds its maximum number of participants.
    #[error("roster is full ({capacity} participants)")]
    Full { capacity: usize },

    /// No participant with this identifier is registered.
    #[error("participant {0} not found")]
    NotFound(ParticipantId),

    /// A participant with this identifier is already registered.
    #[error("participant {0} already registered")]
    AlreadyRegistered(ParticipantId),

    /// The participant has no live connection to send on, either because
    /// this is a client-side copy or because its writer already stopped.
    #[error("participant {0} is not connected")]
    NotConnected(ParticipantId),

    /// Building a notification packet failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
