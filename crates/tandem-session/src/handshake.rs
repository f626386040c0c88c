//! Per-connection handshake state machine.

use std::fmt;

/// Where a new connection is in the handshake.
///
/// The happy path is strictly ordered:
///
/// ```text
/// AwaitingDiscovery → TcpAcknowledged → AwaitingRegistration → Registered
/// ```
///
/// Any non-terminal state may instead move to `Rejected`, which is what a
/// kick before registration looks like. `Registered` and `Rejected` are
/// terminal.
///
/// - **AwaitingDiscovery**: TCP accepted and an identifier assigned; no
///   UDP address has been paired with it yet.
/// - **TcpAcknowledged**: discovery paired and acknowledged over UDP; the
///   `Acknowledge` carrying the identifier is being sent on TCP.
/// - **AwaitingRegistration**: waiting for the client's display name.
/// - **Registered**: in the roster; the connection relays packets.
/// - **Rejected**: kicked and closed, never added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    AwaitingDiscovery,
    TcpAcknowledged,
    AwaitingRegistration,
    Registered,
    Rejected,
}

impl HandshakeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Registered | Self::Rejected)
    }

    /// The next state on the happy path, or `None` from a terminal state.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::AwaitingDiscovery => Some(Self::TcpAcknowledged),
            Self::TcpAcknowledged => Some(Self::AwaitingRegistration),
            Self::AwaitingRegistration => Some(Self::Registered),
            Self::Registered | Self::Rejected => None,
        }
    }

    /// Returns `true` if moving to `target` is allowed.
    pub fn can_transition_to(self, target: Self) -> bool {
        if target == Self::Rejected {
            return !self.is_terminal();
        }
        self.next() == Some(target)
    }

    /// Moves to `target` if allowed, otherwise stays put and returns
    /// `false`.
    pub fn advance_to(&mut self, target: Self) -> bool {
        if !self.can_transition_to(target) {
            return false;
        }
        tracing::trace!(from = %self, to = %target, "handshake transition");
        *self = target;
        true
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitingDiscovery => write!(f, "AwaitingDiscovery"),
            Self::TcpAcknowledged => write!(f, "TcpAcknowledged"),
            Self::AwaitingRegistration => write!(f, "AwaitingRegistration"),
            Self::Registered => write!(f, "Registered"),
            Self::Rejected => write!(f, "Rejected"),
        }
    }
}
