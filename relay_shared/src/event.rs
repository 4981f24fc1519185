//! Relay-level notifications raised by the transport engine for the
//! relay core to consume on its next tick.

use std::net::SocketAddr;

/// Something the transport engine observed that the relay core needs to
/// react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A peer has gone silent for longer than the configured timeout
    /// and has been evicted from the transport layer; the relay core
    /// must also drop any `Client` state keyed on this address.
    PeerTimeout(SocketAddr),
    /// A datagram was received and fully processed at the transport
    /// layer (ack sent if required, sequencing/reorder applied); the
    /// relay core can now read the decoded payload queue for this peer.
    MessageReceived(SocketAddr),
}
