//! `relay_shared`
//!
//! Primitives shared by the transport engine and the relay core:
//! the message codec, per-peer reliability state, the wire header,
//! the identity-service client, and configuration.
//!
//! Design goals:
//! - Deterministic, allocation-light where practical.
//! - Clear separation of concerns (codec, reliability, wire, identity).
//! - No `unsafe`.

pub mod codec;
pub mod config;
pub mod event;
pub mod identity;
pub mod network_id;
pub mod protocol;
pub mod reliability;
pub mod wire;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::codec::{CodecError, MessageBuffer};
    pub use crate::config::RelayConfig;
    pub use crate::event::RelayEvent;
    pub use crate::network_id::NetworkId;
    pub use crate::reliability::{Channel, Peer, Sequence};
    pub use crate::wire::{Header, MsgType};
}
