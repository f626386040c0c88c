//! The in-memory packet: a type tag plus an ordered byte payload.
//!
//! Payloads carry no schema. A sender appends fields with the `write_*`
//! methods and the receiver reads them back with the matching `read_*`
//! methods in the same order. All multi-byte values are little-endian.
//!
//! ```rust
//! use tandem_protocol::{Packet, PacketType};
//!
//! let mut out = Packet::new(PacketType::Application(0x0100));
//! out.write_u32(7).write_bool(true);
//! out.write_str("hello").unwrap();
//!
//! let mut incoming = Packet::decode(&out.encode().unwrap()).unwrap();
//! assert_eq!(incoming.read_u32().unwrap(), 7);
//! assert!(incoming.read_bool().unwrap());
//! assert_eq!(incoming.read_string().unwrap(), "hello");
//! ```

use bytes::{Buf, BufMut};

use crate::{KickReason, PacketType, ParticipantId, ProtocolError};

/// Longest string a single length-prefixed field can carry.
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// A single protocol message.
///
/// Reads advance an internal cursor that only moves forward; reading
/// past the end of the payload is an error, never a silent default.
/// Equality compares the type tag and payload, not the cursor.
#[derive(Debug, Clone)]
pub struct Packet {
    packet_type: PacketType,
    payload: Vec<u8>,
    cursor: usize,
}

impl Packet {
    /// Creates an empty packet of the given type.
    pub fn new(packet_type: PacketType) -> Self {
        Self::with_payload(packet_type, Vec::new())
    }

    /// Creates a packet around an already-encoded payload, cursor at 0.
    pub fn with_payload(packet_type: PacketType, payload: Vec<u8>) -> Self {
        Self {
            packet_type,
            payload,
            cursor: 0,
        }
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Current read offset into the payload.
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.payload.len() - self.cursor
    }

    /// Moves the read cursor back to the start of the payload.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    // -----------------------------------------------------------------------
    // Writers
    // -----------------------------------------------------------------------

    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.payload.put_i32_le(value);
        self
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.payload.put_u32_le(value);
        self
    }

    pub fn write_f32(&mut self, value: f32) -> &mut Self {
        self.payload.put_f32_le(value);
        self
    }

    pub fn write_f64(&mut self, value: f64) -> &mut Self {
        self.payload.put_f64_le(value);
        self
    }

    /// Writes a boolean as a single `0` or `1` byte.
    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.payload.put_u8(u8::from(value));
        self
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.payload.put_u8(value);
        self
    }

    /// Writes a UTF-8 string behind a `u16` byte-length prefix.
    ///
    /// # Errors
    /// [`ProtocolError::PayloadTooLarge`] if the string is longer than
    /// [`MAX_STRING_LEN`] bytes. Nothing is written in that case.
    pub fn write_str(&mut self, value: &str) -> Result<&mut Self, ProtocolError> {
        let len = u16::try_from(value.len()).map_err(|_| {
            ProtocolError::PayloadTooLarge {
                len: value.len(),
                max: MAX_STRING_LEN,
            }
        })?;
        self.payload.put_u16_le(len);
        self.payload.put_slice(value.as_bytes());
        Ok(self)
    }

    // -----------------------------------------------------------------------
    // Readers
    // -----------------------------------------------------------------------

    /// Claims the next `len` payload bytes, or fails without moving.
    fn take(&mut self, len: usize) -> Result<&[u8], ProtocolError> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(ProtocolError::Truncated {
                needed: len,
                remaining,
            });
        }
        let start = self.cursor;
        self.cursor += len;
        Ok(&self.payload[start..self.cursor])
    }

    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(self.take(4)?.get_i32_le())
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(self.take(4)?.get_u32_le())
    }

    pub fn read_f32(&mut self) -> Result<f32, ProtocolError> {
        Ok(self.take(4)?.get_f32_le())
    }

    pub fn read_f64(&mut self) -> Result<f64, ProtocolError> {
        Ok(self.take(8)?.get_f64_le())
    }

    /// Reads a boolean byte. Anything other than `0` or `1` is rejected.
    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        match self.take(1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ProtocolError::InvalidBool(other)),
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    /// Reads a `u16`-prefixed UTF-8 string.
    ///
    /// A prefix that claims more bytes than remain is
    /// [`ProtocolError::Truncated`]; the cursor still moves past the
    /// prefix in that case, which is fine since the packet is unusable.
    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        let len = usize::from(self.take(2)?.get_u16_le());
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidUtf8)
    }

    // -----------------------------------------------------------------------
    // Protocol messages
    // -----------------------------------------------------------------------

    /// `ClientDiscovery`: empty payload, sent over UDP.
    pub fn discovery() -> Self {
        Self::new(PacketType::ClientDiscovery)
    }

    /// `ServerRespondDiscovery`: empty payload, sent over UDP.
    pub fn discovery_ack() -> Self {
        Self::new(PacketType::ServerRespondDiscovery)
    }

    /// `Acknowledge` carrying the identifier the server assigned.
    pub fn acknowledge(id: ParticipantId) -> Self {
        let mut packet = Self::new(PacketType::Acknowledge);
        packet.write_u32(id.0);
        packet
    }

    pub fn registration_request(display_name: &str) -> Result<Self, ProtocolError> {
        let mut packet = Self::new(PacketType::ClientRequestRegistration);
        packet.write_str(display_name)?;
        Ok(packet)
    }

    /// `ServerResponseRegistration` carrying a roster manifest such as
    /// `"1@alice|2@bob"`.
    pub fn registration_response(manifest: &str) -> Result<Self, ProtocolError> {
        let mut packet = Self::new(PacketType::ServerResponseRegistration);
        packet.write_str(manifest)?;
        Ok(packet)
    }

    pub fn kick(reason: KickReason) -> Self {
        let mut packet = Self::new(PacketType::ServerKick);
        packet.write_u32(reason.code());
        packet
    }

    pub fn player_joined(
        id: ParticipantId,
        display_name: &str,
    ) -> Result<Self, ProtocolError> {
        let mut packet = Self::new(PacketType::ServerNotifyPlayerJoined);
        packet.write_u32(id.0).write_str(display_name)?;
        Ok(packet)
    }

    pub fn player_left(id: ParticipantId) -> Self {
        let mut packet = Self::new(PacketType::ServerNotifyPlayerLeft);
        packet.write_u32(id.0);
        packet
    }

    /// Fails with [`ProtocolError::UnexpectedPacket`] unless this packet
    /// has the given type.
    pub fn expect_type(&self, expected: PacketType) -> Result<(), ProtocolError> {
        if self.packet_type == expected {
            Ok(())
        } else {
            Err(ProtocolError::UnexpectedPacket {
                expected,
                found: self.packet_type,
            })
        }
    }
}

impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        self.packet_type == other.packet_type && self.payload == other.payload
    }
}

impl Eq for Packet {}
