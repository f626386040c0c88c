//! Core protocol types: identifiers, packet type tags, kick reasons, and
//! roster manifest entries.
//!
//! Every value in this module has a fixed numeric representation on the
//! wire. Those numbers are part of the protocol and must stay stable
//! across versions.

use std::fmt;

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A server-assigned identifier for a participant.
///
/// Newtype over the `u32` that travels on the wire. Identifiers are
/// handed out in increasing order and never reused while the server
/// process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParticipantId(pub u32);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// PacketType
// ---------------------------------------------------------------------------

/// The type tag carried by every frame.
///
/// The built-in variants drive the handshake and roster notifications.
/// Tags outside that set decode to [`PacketType::Application`], which is
/// how an embedding application defines its own messages. Applications
/// should stay clear of `0x0000..=0x00FF`; that range is reserved for the
/// protocol.
///
/// ```text
/// Invalid                     0x0000
/// ClientRequestRegistration   0x0001   client → server (TCP)
/// ServerResponseRegistration  0x0002   server → client (TCP)
/// ServerKick                  0x0003   server → client (TCP)
/// ServerNotifyPlayerLeft      0x0004   server → client (TCP)
/// ServerNotifyPlayerJoined    0x0005   server → client (TCP)
/// Acknowledge                 0x0006   server → client (TCP)
/// ClientDiscovery             0x0007   client → server (UDP)
/// ServerRespondDiscovery      0x0008   server → client (UDP)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Invalid,
    ClientRequestRegistration,
    ServerResponseRegistration,
    ServerKick,
    ServerNotifyPlayerLeft,
    ServerNotifyPlayerJoined,
    Acknowledge,
    ClientDiscovery,
    ServerRespondDiscovery,
    /// An application-defined tag.
    Application(u16),
}

impl PacketType {
    /// First tag outside the protocol's reserved range.
    pub const FIRST_APPLICATION_TAG: u16 = 0x0100;

    /// Returns the tag as it appears on the wire.
    pub fn as_u16(self) -> u16 {
        match self {
            Self::Invalid => 0x0000,
            Self::ClientRequestRegistration => 0x0001,
            Self::ServerResponseRegistration => 0x0002,
            Self::ServerKick => 0x0003,
            Self::ServerNotifyPlayerLeft => 0x0004,
            Self::ServerNotifyPlayerJoined => 0x0005,
            Self::Acknowledge => 0x0006,
            Self::ClientDiscovery => 0x0007,
            Self::ServerRespondDiscovery => 0x0008,
            Self::Application(tag) => tag,
        }
    }
}

impl From<u16> for PacketType {
    fn from(tag: u16) -> Self {
        match tag {
            0x0000 => Self::Invalid,
            0x0001 => Self::ClientRequestRegistration,
            0x0002 => Self::ServerResponseRegistration,
            0x0003 => Self::ServerKick,
            0x0004 => Self::ServerNotifyPlayerLeft,
            0x0005 => Self::ServerNotifyPlayerJoined,
            0x0006 => Self::Acknowledge,
            0x0007 => Self::ClientDiscovery,
            0x0008 => Self::ServerRespondDiscovery,
            other => Self::Application(other),
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Application(tag) => write!(f, "Application({tag:#06x})"),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

// ---------------------------------------------------------------------------
// KickReason
// ---------------------------------------------------------------------------

/// Why the server ended a participant's session.
///
/// Sent as a `u32` in a [`PacketType::ServerKick`] packet right before
/// the server closes the connection. The protocol only needs the two
/// named reasons; [`KickReason::Other`] carries codes an embedding
/// application adds on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KickReason {
    /// The roster already holds `max_participants` entries.
    ServerFull,
    /// The peer broke the protocol or failed validation.
    QuestionableActivity,
    /// An application-defined reason code.
    Other(u32),
}

impl KickReason {
    pub fn code(self) -> u32 {
        match self {
            Self::ServerFull => 0x0001,
            Self::QuestionableActivity => 0x0002,
            Self::Other(code) => code,
        }
    }
}

impl From<u32> for KickReason {
    fn from(code: u32) -> Self {
        match code {
            0x0001 => Self::ServerFull,
            0x0002 => Self::QuestionableActivity,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for KickReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServerFull => write!(f, "server full"),
            Self::QuestionableActivity => write!(f, "questionable activity"),
            Self::Other(code) => write!(f, "reason {code}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Roster manifest
// ---------------------------------------------------------------------------

/// Separates entries in a roster manifest. Display names may never
/// contain it.
pub const ENTRY_SEPARATOR: char = '|';

/// Separates the identifier from the display name inside one entry.
pub const ID_SEPARATOR: char = '@';

/// One participant as listed in a registration response.
///
/// On the wire an entry is `identifier@displayname`, and a full manifest
/// joins entries with `|`: `"1@alice|2@bob"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub id: ParticipantId,
    pub display_name: String,
}

impl RosterEntry {
    pub fn new(id: ParticipantId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }

    /// Parses a single `identifier@displayname` entry.
    ///
    /// Splits on the first `@`; identifiers are plain digits, so any
    /// later `@` belongs to the display name.
    pub fn parse(entry: &str) -> Result<Self, ProtocolError> {
        let (id, name) = entry
            .split_once(ID_SEPARATOR)
            .ok_or_else(|| ProtocolError::InvalidRoster(entry.to_string()))?;
        let id: u32 = id
            .parse()
            .map_err(|_| ProtocolError::InvalidRoster(entry.to_string()))?;
        if name.is_empty() {
            return Err(ProtocolError::InvalidRoster(entry.to_string()));
        }
        Ok(Self::new(ParticipantId(id), name))
    }
}

impl fmt::Display for RosterEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.id.0, ID_SEPARATOR, self.display_name)
    }
}

/// Renders entries as a manifest string, in the order given.
pub fn format_manifest<'a>(
    entries: impl IntoIterator<Item = &'a RosterEntry>,
) -> String {
    let mut out = String::new();
    for (i, entry) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(ENTRY_SEPARATOR);
        }
        out.push_str(&entry.to_string());
    }
    out
}

/// Parses a manifest string. An empty string is an empty roster.
pub fn parse_manifest(manifest: &str) -> Result<Vec<RosterEntry>, ProtocolError> {
    if manifest.is_empty() {
        return Ok(Vec::new());
    }
    manifest.split(ENTRY_SEPARATOR).map(RosterEntry::parse).collect()
}
