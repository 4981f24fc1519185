//! Per-peer reliability state: 8-bit wrap-aware sequencing, the unacked
//! retry table, and reorder buffers for `ReliableOrdered` channels.
//!
//! One `Peer` exists per remote socket address and is shared between
//! the transport engine's blocking receiver thread (which only reads
//! sequence/unacked state to decide whether to ack and what to deliver)
//! and the async tick that drives retries and timeouts. Callers are
//! expected to guard a `Peer` behind a `Mutex` (see
//! `relay_server::transport`).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::wire::MsgType;

/// A channel identifier: distinct delivery streams on the same peer run
/// independent sequence counters, so out-of-order arrival on one
/// channel never affects another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel(pub u8);

/// An 8-bit sequence number. Arithmetic on this type wraps at 256 and
/// "newer than" is defined over a half-window, so a wrapped value still
/// compares as newer than what it wrapped past.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sequence(pub u8);

impl Sequence {
    pub const ZERO: Sequence = Sequence(0);

    pub fn next(self) -> Self {
        Sequence(self.0.wrapping_add(1))
    }

    /// True if `self` is strictly newer than `other` under wraparound:
    /// the forward distance from `other` to `self` is in `1..=127`.
    pub fn is_newer_than(self, other: Sequence) -> bool {
        let diff = self.0.wrapping_sub(other.0);
        diff != 0 && diff < 128
    }

    /// True if `self` is exactly the next sequence after `other`.
    pub fn is_next_after(self, other: Sequence) -> bool {
        self == other.next()
    }
}

/// A single unacked reliable frame awaiting retransmission.
#[derive(Debug, Clone)]
pub struct UnackedFrame {
    pub payload: Vec<u8>,
    pub last_sent: Instant,
    pub retries: u32,
}

/// Per-peer sequencing and reliability state for one remote endpoint.
#[derive(Debug)]
pub struct Peer {
    /// Next outgoing sequence number per channel.
    outgoing_seq: HashMap<Channel, Sequence>,
    /// Highest sequence number accepted per channel (for sequenced
    /// disciplines: used to drop stale duplicates).
    incoming_seq: HashMap<Channel, Sequence>,
    /// Reorder buffer for `ReliableOrdered` channels: frames received
    /// ahead of the next expected sequence, held until the gap fills.
    reorder_buf: HashMap<Channel, HashMap<Sequence, Vec<u8>>>,
    /// Unacked reliable frames awaiting ack or retry, keyed by
    /// (channel, sequence).
    unacked: HashMap<(Channel, Sequence), UnackedFrame>,
    /// Last time any datagram was received from this peer, for the
    /// idle-timeout sweep.
    pub last_active: Instant,
}

impl Peer {
    pub fn new(now: Instant) -> Self {
        Self {
            outgoing_seq: HashMap::new(),
            incoming_seq: HashMap::new(),
            reorder_buf: HashMap::new(),
            unacked: HashMap::new(),
            last_active: now,
        }
    }

    /// Allocates the next outgoing sequence number on `channel`.
    pub fn next_outgoing(&mut self, channel: Channel) -> Sequence {
        let seq = self.outgoing_seq.get(&channel).copied().unwrap_or(Sequence::ZERO);
        self.outgoing_seq.insert(channel, seq.next());
        seq
    }

    /// Records a just-sent reliable frame for retry tracking. Only
    /// called for `msg_type.is_reliable()` channels; the unreliable
    /// disciplines never enter this table.
    pub fn track_unacked(&mut self, channel: Channel, seq: Sequence, payload: Vec<u8>, now: Instant) {
        self.unacked.insert(
            (channel, seq),
            UnackedFrame {
                payload,
                last_sent: now,
                retries: 0,
            },
        );
    }

    /// Clears a frame from the unacked table on ack receipt.
    pub fn ack(&mut self, channel: Channel, seq: Sequence) {
        self.unacked.remove(&(channel, seq));
    }

    /// Returns payloads due for retransmission (last sent more than
    /// `retry_interval` ago), bumping their retry counters and dropping
    /// any that have exhausted `retry_cap`.
    ///
    /// The cap check happens *after* incrementing, so a frame is retried
    /// exactly `retry_cap` times (an initial send plus `retry_cap`
    /// retries, `retry_cap + 1` total transmissions) rather than being
    /// silently dropped one retry early.
    pub fn due_retries(
        &mut self,
        retry_interval: Duration,
        retry_cap: u32,
        now: Instant,
    ) -> Vec<((Channel, Sequence), Vec<u8>)> {
        let mut due = Vec::new();
        let mut drop_keys = Vec::new();

        for (key, frame) in self.unacked.iter_mut() {
            if now.duration_since(frame.last_sent) < retry_interval {
                continue;
            }
            frame.retries += 1;
            if frame.retries > retry_cap {
                drop_keys.push(*key);
                continue;
            }
            frame.last_sent = now;
            due.push((*key, frame.payload.clone()));
        }

        for key in drop_keys {
            self.unacked.remove(&key);
        }

        due
    }

    pub fn unacked_len(&self) -> usize {
        self.unacked.len()
    }

    /// Decides whether an incoming frame on a sequenced channel should
    /// be accepted (newer than anything seen) or dropped as stale.
    pub fn accept_sequenced(&mut self, channel: Channel, seq: Sequence) -> bool {
        match self.incoming_seq.get(&channel) {
            Some(&highest) if !seq.is_newer_than(highest) => false,
            _ => {
                self.incoming_seq.insert(channel, seq);
                true
            }
        }
    }

    /// Feeds a `ReliableOrdered` frame through the reorder buffer,
    /// returning every payload now releasable in sequence order
    /// (possibly more than one, if this frame filled a gap).
    pub fn reorder_push(&mut self, channel: Channel, seq: Sequence, payload: Vec<u8>) -> Vec<Vec<u8>> {
        let next_expected = self
            .incoming_seq
            .get(&channel)
            .copied()
            .map(Sequence::next)
            .unwrap_or(Sequence::ZERO);

        let buf = self.reorder_buf.entry(channel).or_default();

        if seq != next_expected && !seq.is_newer_than(next_expected) {
            // Duplicate or stale frame already delivered; ignore.
            return Vec::new();
        }

        buf.insert(seq, payload);

        let mut released = Vec::new();
        let mut cursor = next_expected;
        while let Some(p) = buf.remove(&cursor) {
            released.push(p);
            self.incoming_seq.insert(channel, cursor);
            cursor = cursor.next();
        }
        released
    }

    /// Number of frames currently held in reorder buffers, for tests
    /// and diagnostics.
    pub fn reorder_pending(&self, channel: Channel) -> usize {
        self.reorder_buf.get(&channel).map(HashMap::len).unwrap_or(0)
    }
}

/// Whether the given discipline requires per-peer mutable sequencing
/// state at all (all five do; kept as a lookup for symmetry with
/// `MsgType::is_reliable`/`is_sequenced`).
pub fn requires_state(_msg_type: MsgType) -> bool {
    true
}
