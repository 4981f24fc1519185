//! The 3-byte datagram header every relay packet carries, and the
//! delivery-discipline enum it encodes.
//!
//! Byte layout:
//!
//! ```text
//! byte 0: [ is_ack:1 | reserved:2 | msg_type:3 | version:2 ]
//! byte 1: channel (u8)
//! byte 2: sequence (u8)
//! ```
//!
//! The `version` field is carried for forward compatibility but the
//! relay only ever emits `CURRENT_VERSION`. Ack frames set `is_ack` and,
//! for wire compatibility with the historical reference client, encode
//! the first byte as `version | 0x28` rather than setting the bit
//! through the `msg_type`/`reserved` fields individually.

use crate::reliability::{Channel, Sequence};

/// Wire protocol version this implementation emits.
pub const CURRENT_VERSION: u8 = 0;

/// The historical literal byte-0 value for ack frames, preserved for
/// compatibility with a reference client that does not decode the
/// header field-by-field for acks.
const ACK_BYTE0: u8 = 0x28;

/// The five delivery disciplines a channel can be configured for, plus
/// the reserved ack pseudo-type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    /// Fire-and-forget: no sequencing, no retries, duplicates possible.
    Unreliable = 0,
    /// Unreliable but sequenced: stale-sequence datagrams are dropped on
    /// arrival, never delivered out of order, never retried.
    UnreliableSequenced = 1,
    /// Reliable: retried until acked, delivered in arrival order.
    Reliable = 2,
    /// Reliable and sequenced: retried until acked, stale duplicates
    /// dropped, never reordered.
    ReliableSequenced = 3,
    /// Reliable and ordered: retried until acked, buffered and released
    /// strictly in sequence order.
    ReliableOrdered = 4,
}

impl MsgType {
    /// Whether frames of this type are tracked in the unacked/retry
    /// table. Only the reliable classes participate; `Unreliable` and
    /// `UnreliableSequenced` are never retried.
    pub fn is_reliable(self) -> bool {
        matches!(
            self,
            MsgType::Reliable | MsgType::ReliableSequenced | MsgType::ReliableOrdered
        )
    }

    /// Whether stale/duplicate sequence numbers should be dropped rather
    /// than delivered.
    pub fn is_sequenced(self) -> bool {
        matches!(
            self,
            MsgType::UnreliableSequenced | MsgType::ReliableSequenced | MsgType::ReliableOrdered
        )
    }

    /// Whether delivery must additionally be held for in-order release.
    pub fn is_ordered(self) -> bool {
        matches!(self, MsgType::ReliableOrdered)
    }

    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(MsgType::Unreliable),
            1 => Some(MsgType::UnreliableSequenced),
            2 => Some(MsgType::Reliable),
            3 => Some(MsgType::ReliableSequenced),
            4 => Some(MsgType::ReliableOrdered),
            _ => None,
        }
    }
}

/// A decoded 3-byte header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub is_ack: bool,
    pub msg_type: MsgType,
    pub version: u8,
    pub channel: Channel,
    pub sequence: Sequence,
}

/// Errors decoding a header from raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    TooShort(usize),
    UnknownMsgType(u8),
}

impl Header {
    pub fn data(msg_type: MsgType, channel: Channel, sequence: Sequence) -> Self {
        Self {
            is_ack: false,
            msg_type,
            version: CURRENT_VERSION,
            channel,
            sequence,
        }
    }

    pub fn ack(channel: Channel, sequence: Sequence) -> Self {
        Self {
            is_ack: true,
            // Acks don't carry a meaningful msg_type on the wire; picked
            // arbitrarily since `encode` special-cases is_ack.
            msg_type: MsgType::Reliable,
            version: CURRENT_VERSION,
            channel,
            sequence,
        }
    }

    /// Encodes the 3-byte header.
    pub fn encode(&self) -> [u8; 3] {
        let byte0 = if self.is_ack {
            self.version | ACK_BYTE0
        } else {
            let msg_bits = (self.msg_type as u8) & 0b111;
            (msg_bits << 2) | (self.version & 0b11)
        };
        [byte0, self.channel.0, self.sequence.0]
    }

    /// Decodes a 3-byte header from the front of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, HeaderError> {
        if bytes.len() < 3 {
            return Err(HeaderError::TooShort(bytes.len()));
        }
        let byte0 = bytes[0];
        let channel = Channel(bytes[1]);
        let sequence = Sequence(bytes[2]);

        // Data headers only ever occupy bits 0-4 (msg_type in 0..=4 needs
        // at most 3 bits shifted by 2, version 2 bits), so the ack
        // literal's bits 3 and 5 can never appear in a data header and
        // unambiguously identify it.
        let is_ack = byte0 & !0b11 == ACK_BYTE0;
        if is_ack {
            return Ok(Self {
                is_ack: true,
                msg_type: MsgType::Reliable,
                version: byte0 & 0b11,
                channel,
                sequence,
            });
        }

        let msg_bits = (byte0 >> 2) & 0b111;
        let msg_type =
            MsgType::from_bits(msg_bits).ok_or(HeaderError::UnknownMsgType(msg_bits))?;
        Ok(Self {
            is_ack: false,
            msg_type,
            version: byte0 & 0b11,
            channel,
            sequence,
        })
    }
}

/// Size in bytes of the header every datagram carries.
pub const HEADER_LEN: usize = 3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_header_roundtrips() {
        let h = Header::data(MsgType::ReliableOrdered, Channel(3), Sequence(200));
        let bytes = h.encode();
        let decoded = Header::decode(&bytes).unwrap();
        assert_eq!(h, decoded);
    }

    #[test]
    fn ack_header_emits_historical_literal_byte() {
        let h = Header::ack(Channel(1), Sequence(9));
        let bytes = h.encode();
        assert_eq!(bytes[0], CURRENT_VERSION | ACK_BYTE0);
        let decoded = Header::decode(&bytes).unwrap();
        assert!(decoded.is_ack);
        assert_eq!(decoded.channel, Channel(1));
        assert_eq!(decoded.sequence, Sequence(9));
    }

    #[test]
    fn decode_rejects_short_buffers() {
        assert_eq!(Header::decode(&[1, 2]), Err(HeaderError::TooShort(2)));
    }

    #[test]
    fn decode_rejects_unknown_msg_type() {
        // msg_bits = 7 (0b111), not a defined MsgType.
        let byte0 = (7u8 << 2) | CURRENT_VERSION;
        assert_eq!(
            Header::decode(&[byte0, 0, 0]),
            Err(HeaderError::UnknownMsgType(7))
        );
    }

    #[test]
    fn reliability_predicates_partition_msg_types() {
        assert!(!MsgType::Unreliable.is_reliable());
        assert!(!MsgType::UnreliableSequenced.is_reliable());
        assert!(MsgType::Reliable.is_reliable());
        assert!(MsgType::ReliableSequenced.is_reliable());
        assert!(MsgType::ReliableOrdered.is_reliable());

        assert!(!MsgType::Unreliable.is_sequenced());
        assert!(MsgType::UnreliableSequenced.is_sequenced());
        assert!(!MsgType::Reliable.is_sequenced());
        assert!(MsgType::ReliableSequenced.is_sequenced());
        assert!(MsgType::ReliableOrdered.is_sequenced());

        assert!(MsgType::ReliableOrdered.is_ordered());
        assert!(!MsgType::ReliableSequenced.is_ordered());
    }
}
