//! Allocation of small, monotonically-increasing peer identifiers used
//! in application-level messages (distinct from the transport-level
//! `SocketAddr` key used by the peer registry).

use std::sync::atomic::{AtomicI16, Ordering};

/// A peer's network-visible identifier, assigned at join time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkId(pub i16);

/// Monotonic allocator for `NetworkId`s. Wraps at `i16::MAX` back to 0;
/// a relay session realistically never has anywhere near 32767
/// concurrent joins, so reuse after wraparound is not a practical
/// concern, but the wrap keeps the allocator from panicking under a
/// pathological long-running server.
#[derive(Debug, Default)]
pub struct NetworkIdAllocator {
    next: AtomicI16,
}

impl NetworkIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicI16::new(0),
        }
    }

    pub fn allocate(&self) -> NetworkId {
        let id = self.next.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
            Some(if v == i16::MAX { 0 } else { v + 1 })
        });
        NetworkId(id.unwrap_or(0))
    }
}
