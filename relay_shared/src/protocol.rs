//! Application-level opcode frames exchanged once a datagram's header
//! has been stripped by the transport engine. Every frame begins with
//! an `i16` opcode; the remainder is decoded here with `MessageBuffer`.

use crate::codec::{MessageBuffer, Result as CodecResult};
use crate::network_id::NetworkId;

/// Opcode 0, client → server: a join request carrying the identity
/// service credentials to verify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub user_id: String,
    pub token: String,
}

pub const OP_JOIN: i16 = 0;
pub const OP_DISCONNECT: i16 = 1;
pub const OP_CLIENT_STATE: i16 = 2;
pub const OP_VOICE: i16 = 3;
pub const OP_POSITION: i16 = 4;
pub const OP_SKELETAL: i16 = 5;
pub const OP_SERVER_JOINED: i16 = 200;
pub const OP_SERVER_LEFT: i16 = 201;
pub const OP_SERVER_ROSTER: i16 = 202;

impl JoinRequest {
    pub fn decode(buf: &mut MessageBuffer) -> CodecResult<Self> {
        Ok(Self {
            user_id: buf.read_string()?,
            token: buf.read_string()?,
        })
    }
}

/// One entry of an opcode-2 client-state frame: a peer's desired
/// update rate and whether its voice should be heard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientStateEntry {
    pub peer_id: i16,
    pub rate: u8,
    pub can_hear: bool,
}

const CAN_HEAR_BIT: u8 = 0x80;
const RATE_MASK: u8 = 0x7F;
const MIN_RATE: u8 = 1;
const MAX_RATE: u8 = 60;

impl ClientStateEntry {
    fn from_wire(peer_id: i16, bits: u8) -> Self {
        let rate = (bits & RATE_MASK).clamp(MIN_RATE, MAX_RATE);
        let can_hear = bits & CAN_HEAR_BIT != 0;
        Self {
            peer_id,
            rate,
            can_hear,
        }
    }
}

/// Opcode 2, client → server: replaces the sender's entire `updateRate`
/// and `canHear` state in one shot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientStateUpdate {
    pub entries: Vec<ClientStateEntry>,
}

impl ClientStateUpdate {
    pub fn decode(buf: &mut MessageBuffer) -> CodecResult<Self> {
        let count = buf.read_i16()?;
        let mut entries = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count.max(0) {
            let peer_id = buf.read_i16()?;
            let bits = buf.read_u8()?;
            entries.push(ClientStateEntry::from_wire(peer_id, bits));
        }
        Ok(Self { entries })
    }
}

/// Opcode 200, server → client: a peer has joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerJoined {
    pub network_id: NetworkId,
    pub user_id: String,
}

impl PeerJoined {
    pub fn encode(&self, buf: &mut MessageBuffer) {
        buf.write_i16(OP_SERVER_JOINED);
        buf.write_i16(self.network_id.0);
        buf.write_string(&self.user_id);
    }
}

/// Opcode 201, server → client: a peer has left (disconnect or timeout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerLeft {
    pub network_id: NetworkId,
}

impl PeerLeft {
    pub fn encode(&self, buf: &mut MessageBuffer) {
        buf.write_i16(OP_SERVER_LEFT);
        buf.write_i16(self.network_id.0);
    }
}

/// One entry of an opcode-202 roster snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub network_id: NetworkId,
    pub user_id: String,
}

/// Opcode 202, server → client: the full roster of already-connected
/// peers, unicast to a joiner right after its own join succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    pub entries: Vec<RosterEntry>,
}

impl Roster {
    pub fn encode(&self, buf: &mut MessageBuffer) {
        buf.write_i16(OP_SERVER_ROSTER);
        buf.write_i16(self.entries.len() as i16);
        for entry in &self.entries {
            buf.write_i16(entry.network_id.0);
            buf.write_string(&entry.user_id);
        }
    }
}

/// Strips the opcode off the front of a decoded frame, leaving the
/// buffer positioned at the payload.
pub fn peek_opcode(buf: &mut MessageBuffer) -> CodecResult<i16> {
    buf.read_i16()
}

/// Position/skeletal payloads (opcodes 4/5) carry the sender's
/// `networkId` as a 2-byte prefix ahead of opaque telemetry bytes. The
/// relay strips this prefix and re-wraps with its own authoritative
/// `networkId` before fan-out, so a client cannot spoof another peer's
/// identity by crafting the prefix.
pub fn strip_sender_prefix(payload: &[u8]) -> CodecResult<(i16, Vec<u8>)> {
    let mut buf = MessageBuffer::from_bytes(payload);
    let claimed_id = buf.read_i16()?;
    let rest = buf.read_remaining();
    Ok((claimed_id, rest))
}

/// Builds an outbound position/skeletal frame: opcode, authoritative
/// sender id, effective rate, then the telemetry bytes verbatim.
pub fn build_telemetry_frame(opcode: i16, sender_id: NetworkId, effective_rate: u8, telemetry: &[u8]) -> MessageBuffer {
    let mut buf = MessageBuffer::new(telemetry.len() + 8);
    buf.write_i16(opcode);
    buf.write_i16(sender_id.0);
    buf.write_u8(effective_rate);
    buf.write_bytes(telemetry, false);
    buf
}
