//! Frame codec: turning a [`Packet`] into wire bytes and back.
//!
//! ```text
//! ┌─────────┬─────────┬──────────────┬────────────┬──────────────────┐
//! │ magic_1 │ magic_2 │ length (u16) │ type (u16) │ payload          │
//! │  0x54   │  0x44   │ 2 + payload  │            │ length - 2 bytes │
//! └─────────┴─────────┴──────────────┴────────────┴──────────────────┘
//!  └──────────── header ────────────┘└────────────── body ───────────┘
//! ```
//!
//! Integers are little-endian. The same frame is used on both
//! transports:
//!
//! - **TCP**: the reader pulls exactly [`HEADER_LEN`] bytes, hands them
//!   to [`FrameHeader::parse`], then pulls exactly `body_len` more bytes
//!   and hands those to [`Packet::from_body`]. A single stream read is
//!   never assumed to hold a whole frame.
//! - **UDP**: one datagram is one frame; [`Packet::decode_datagram`]
//!   rejects anything whose size disagrees with its header.

use bytes::{Buf, BufMut};

use crate::{Packet, PacketType, ProtocolError};

/// Protocol marker at the start of every frame.
pub const MAGIC: [u8; 2] = [0x54, 0x44];

/// Magic bytes plus the `u16` length field.
pub const HEADER_LEN: usize = 4;

/// Size of the type tag at the start of every body.
pub const TYPE_TAG_LEN: usize = 2;

/// Smallest possible frame: header plus a type tag and no payload.
pub const MIN_FRAME_LEN: usize = HEADER_LEN + TYPE_TAG_LEN;

/// Largest payload the `u16` length field can describe.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize - TYPE_TAG_LEN;

/// A validated frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Bytes following the header: the type tag plus the payload.
    pub body_len: usize,
}

impl FrameHeader {
    /// Validates the magic marker and reads the length field.
    ///
    /// The magic check happens before anything else, so the length of
    /// a frame that doesn't belong to this protocol is never trusted.
    /// Bytes past the header are ignored.
    ///
    /// # Errors
    /// - [`ProtocolError::Truncated`] if fewer than [`HEADER_LEN`] bytes
    ///   are available
    /// - [`ProtocolError::MagicMismatch`] if the marker is wrong
    /// - [`ProtocolError::MalformedFrame`] if the length can't hold a
    ///   type tag
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < MAGIC.len() {
            return Err(ProtocolError::Truncated {
                needed: HEADER_LEN,
                remaining: bytes.len(),
            });
        }
        let found = [bytes[0], bytes[1]];
        if found != MAGIC {
            return Err(ProtocolError::MagicMismatch {
                expected: MAGIC,
                found,
            });
        }
        if bytes.len() < HEADER_LEN {
            return Err(ProtocolError::Truncated {
                needed: HEADER_LEN,
                remaining: bytes.len(),
            });
        }
        let body_len = usize::from((&bytes[2..HEADER_LEN]).get_u16_le());
        if body_len < TYPE_TAG_LEN {
            return Err(ProtocolError::MalformedFrame { length: body_len });
        }
        Ok(Self { body_len })
    }
}

impl Packet {
    /// Serializes this packet into a complete frame.
    ///
    /// # Errors
    /// [`ProtocolError::PayloadTooLarge`] if the payload exceeds
    /// [`MAX_PAYLOAD_LEN`].
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let payload = self.payload();
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        // Fits: checked against MAX_PAYLOAD_LEN above.
        let length = (TYPE_TAG_LEN + payload.len()) as u16;

        let mut frame = Vec::with_capacity(HEADER_LEN + usize::from(length));
        frame.put_slice(&MAGIC);
        frame.put_u16_le(length);
        frame.put_u16_le(self.packet_type().as_u16());
        frame.put_slice(payload);
        Ok(frame)
    }

    /// Builds a packet from a frame body (type tag followed by payload).
    pub fn from_body(body: &[u8]) -> Result<Self, ProtocolError> {
        if body.len() < TYPE_TAG_LEN {
            return Err(ProtocolError::MalformedFrame { length: body.len() });
        }
        let (mut tag, payload) = body.split_at(TYPE_TAG_LEN);
        let packet_type = PacketType::from(tag.get_u16_le());
        Ok(Self::with_payload(packet_type, payload.to_vec()))
    }

    /// Decodes exactly one frame from `frame`.
    ///
    /// # Errors
    /// - header errors from [`FrameHeader::parse`]
    /// - [`ProtocolError::Truncated`] if fewer body bytes are present than
    ///   the header declares
    /// - [`ProtocolError::SizeMismatch`] if bytes trail the frame
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let header = FrameHeader::parse(frame)?;
        let body = &frame[HEADER_LEN..];
        if body.len() < header.body_len {
            return Err(ProtocolError::Truncated {
                needed: header.body_len,
                remaining: body.len(),
            });
        }
        if body.len() > header.body_len {
            return Err(ProtocolError::SizeMismatch {
                declared: header.body_len,
                actual: body.len(),
            });
        }
        Self::from_body(body)
    }

    /// Decodes a UDP datagram, which must hold exactly one frame.
    ///
    /// A datagram shorter than [`MIN_FRAME_LEN`], or whose declared
    /// length doesn't match what arrived, is a
    /// [`ProtocolError::SizeMismatch`].
    pub fn decode_datagram(datagram: &[u8]) -> Result<Self, ProtocolError> {
        if datagram.len() < MIN_FRAME_LEN {
            return Err(ProtocolError::SizeMismatch {
                declared: MIN_FRAME_LEN,
                actual: datagram.len(),
            });
        }
        let header = FrameHeader::parse(datagram)?;
        let body = &datagram[HEADER_LEN..];
        if body.len() != header.body_len {
            return Err(ProtocolError::SizeMismatch {
                declared: header.body_len,
                actual: body.len(),
            });
        }
        Self::from_body(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{KickReason, ParticipantId};

    #[test]
    fn test_encode_layout() {
        let mut packet = Packet::new(PacketType::Acknowledge);
        packet.write_u32(1);
        let frame = packet.encode().unwrap();
        assert_eq!(frame, vec![0x54, 0x44, 6, 0, 0x06, 0x00, 1, 0, 0, 0]);
    }

    #[test]
    fn test_empty_payload_frame_is_minimal() {
        let frame = Packet::discovery().encode().unwrap();
        assert_eq!(frame.len(), MIN_FRAME_LEN);
        assert_eq!(&frame[2..4], &[2, 0]);
    }

    #[test]
    fn test_decode_recovers_type_and_fields() {
        let mut packet = Packet::new(PacketType::Application(0x0300));
        packet.write_f64(3.25).write_i32(-1);
        packet.write_str("name").unwrap();

        let mut decoded = Packet::decode(&packet.encode().unwrap()).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.position(), 0);
        assert_eq!(decoded.read_f64().unwrap(), 3.25);
        assert_eq!(decoded.read_i32().unwrap(), -1);
        assert_eq!(decoded.read_string().unwrap(), "name");
    }

    #[test]
    fn test_every_builtin_type_survives_encoding() {
        let packets = vec![
            Packet::new(PacketType::Invalid),
            Packet::acknowledge(ParticipantId(4)),
            Packet::registration_request("alice").unwrap(),
            Packet::discovery(),
            Packet::discovery_ack(),
            Packet::registration_response("1@alice|2@bob").unwrap(),
            Packet::kick(KickReason::QuestionableActivity),
            Packet::player_left(ParticipantId(2)),
            Packet::player_joined(ParticipantId(2), "bob").unwrap(),
        ];
        for packet in packets {
            let frame = packet.encode().unwrap();
            assert_eq!(Packet::decode(&frame).unwrap(), packet);
            assert_eq!(Packet::decode_datagram(&frame).unwrap(), packet);
        }
    }

    #[test]
    fn test_magic_mismatch_is_rejected_first() {
        // Garbage length and type: must not matter.
        let frame = [0x00, 0x44, 0xFF, 0xFF, 0x01, 0x00];
        assert_eq!(
            Packet::decode(&frame),
            Err(ProtocolError::MagicMismatch {
                expected: MAGIC,
                found: [0x00, 0x44],
            })
        );
        assert!(matches!(
            Packet::decode_datagram(&frame),
            Err(ProtocolError::MagicMismatch { .. })
        ));
    }

    #[test]
    fn test_length_below_type_tag_is_malformed() {
        let frame = [0x54, 0x44, 1, 0, 0x06];
        assert_eq!(
            Packet::decode(&frame),
            Err(ProtocolError::MalformedFrame { length: 1 })
        );
    }

    #[test]
    fn test_short_buffer_is_truncated() {
        let frame = Packet::acknowledge(ParticipantId(1)).encode().unwrap();
        let short = &frame[..frame.len() - 1];
        assert_eq!(
            Packet::decode(short),
            Err(ProtocolError::Truncated {
                needed: 6,
                remaining: 5
            })
        );
        assert!(matches!(
            Packet::decode(&frame[..3]),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn test_trailing_bytes_are_size_mismatch() {
        let mut frame = Packet::discovery().encode().unwrap();
        frame.push(0);
        assert_eq!(
            Packet::decode(&frame),
            Err(ProtocolError::SizeMismatch {
                declared: 2,
                actual: 3
            })
        );
    }

    #[test]
    fn test_datagram_size_mismatches() {
        let frame = Packet::acknowledge(ParticipantId(1)).encode().unwrap();

        // Shorter than the minimal frame.
        assert!(matches!(
            Packet::decode_datagram(&frame[..4]),
            Err(ProtocolError::SizeMismatch { .. })
        ));
        // Header says 6 body bytes, datagram carries 5.
        assert_eq!(
            Packet::decode_datagram(&frame[..frame.len() - 1]),
            Err(ProtocolError::SizeMismatch {
                declared: 6,
                actual: 5
            })
        );
        // Extra byte on the end.
        let mut long = frame.clone();
        long.push(9);
        assert_eq!(
            Packet::decode_datagram(&long),
            Err(ProtocolError::SizeMismatch {
                declared: 6,
                actual: 7
            })
        );
    }

    #[test]
    fn test_header_parse_reads_body_len() {
        let header = FrameHeader::parse(&[0x54, 0x44, 0x10, 0x01]).unwrap();
        assert_eq!(header.body_len, 0x0110);
    }

    #[test]
    fn test_oversized_payload_is_refused() {
        let packet = Packet::with_payload(
            PacketType::Invalid,
            vec![0; MAX_PAYLOAD_LEN + 1],
        );
        assert!(matches!(
            packet.encode(),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));

        let largest =
            Packet::with_payload(PacketType::Invalid, vec![0; MAX_PAYLOAD_LEN]);
        let frame = largest.encode().unwrap();
        assert_eq!(&frame[2..4], &[0xFF, 0xFF]);
    }
}
