//! `relay_server`
//!
//! The datagram server binary's two halves:
//! - `transport`: the bound socket, the blocking receiver thread,
//!   per-peer reliability state, and the retry/timeout tick.
//! - `relay`: client registry, join authentication, opcode dispatch,
//!   and the rate-paced broadcast tick.

pub mod relay;
pub mod transport;

pub use relay::Relay;
pub use transport::Transport;
