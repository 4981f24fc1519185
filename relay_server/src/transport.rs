//! Transport engine: owns the bound datagram socket, a dedicated
//! blocking receiver thread, per-peer reliability state, and the
//! periodic retry/timeout tick.
//!
//! Concurrency split: the receiver thread only ever decodes headers,
//! updates sequencing/unacked state, and enqueues `(SocketAddr,
//! Vec<u8>)` application payloads plus `RelayEvent`s. All client-state
//! mutation happens on the async main thread that drains those queues
//! once per tick — the receiver thread never touches `relay::Client`.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use relay_shared::event::RelayEvent;
use relay_shared::reliability::{Channel, Peer};
use relay_shared::wire::{Header, MsgType, HEADER_LEN};

/// Maximum UDP payload the engine will read in one call.
const MAX_DATAGRAM: usize = 65_507;

/// Peer reliability state plus the one clock hand that decides
/// eviction, behind a single lock so receiver-thread and tick-thread
/// access interleave safely.
type PeerEntry = Mutex<Peer>;

/// The transport engine. Cheaply cloneable; internals are `Arc`-shared
/// with the spawned receiver thread.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

struct Inner {
    socket: tokio::net::UdpSocket,
    peers: Arc<DashMap<SocketAddr, PeerEntry>>,
    retry_interval: Duration,
    retry_cap: u32,
    peer_timeout: Duration,
    event_tx: mpsc::UnboundedSender<RelayEvent>,
}

/// Handles returned alongside `Transport::bind` for draining what the
/// receiver thread produces.
pub struct TransportQueues {
    pub received_rx: mpsc::UnboundedReceiver<(SocketAddr, Vec<u8>)>,
    pub event_rx: mpsc::UnboundedReceiver<RelayEvent>,
}

impl Transport {
    /// Binds `addr`, spawning the blocking receiver thread immediately.
    pub fn bind(
        addr: SocketAddr,
        retry_interval: Duration,
        retry_cap: u32,
        peer_timeout: Duration,
    ) -> std::io::Result<(Self, TransportQueues)> {
        let blocking_socket = std::net::UdpSocket::bind(addr)?;
        blocking_socket.set_nonblocking(false)?;
        let async_clone = blocking_socket.try_clone()?;
        async_clone.set_nonblocking(true)?;
        let socket = tokio::net::UdpSocket::from_std(async_clone)?;

        let peers: Arc<DashMap<SocketAddr, PeerEntry>> = Arc::new(DashMap::new());
        let (received_tx, received_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let recv_socket = blocking_socket.try_clone()?;
        let recv_peers = peers.clone();
        let recv_event_tx = event_tx.clone();
        std::thread::spawn(move || {
            receiver_loop(recv_socket, recv_peers, received_tx, recv_event_tx);
        });

        let transport = Transport {
            inner: Arc::new(Inner {
                socket,
                peers,
                retry_interval,
                retry_cap,
                peer_timeout,
                event_tx,
            }),
        };

        Ok((transport, TransportQueues { received_rx, event_rx }))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.socket.local_addr()
    }

    /// Sends an application payload to `peer_addr` on `channel` using
    /// `msg_type`'s discipline, prepending the 3-byte header and
    /// allocating the next outgoing sequence for that `(peer, channel)`.
    ///
    /// Reliable-class frames (`msg_type.is_reliable()`) are additionally
    /// recorded in the peer's unacked table for retry; unreliable
    /// classes are never tracked.
    pub async fn send(
        &self,
        peer_addr: SocketAddr,
        msg_type: MsgType,
        channel: Channel,
        payload: &[u8],
    ) -> std::io::Result<()> {
        let entry = self
            .inner
            .peers
            .entry(peer_addr)
            .or_insert_with(|| Mutex::new(Peer::new(Instant::now())));

        let mut datagram = Vec::with_capacity(HEADER_LEN + payload.len());
        {
            let mut peer = entry.lock().unwrap();
            let seq = peer.next_outgoing(channel);
            let header = Header::data(msg_type, channel, seq);
            datagram.extend_from_slice(&header.encode());
            datagram.extend_from_slice(payload);
            if msg_type.is_reliable() {
                peer.track_unacked(channel, seq, datagram.clone(), Instant::now());
            }
        }
        drop(entry);

        self.inner.socket.send_to(&datagram, peer_addr).await?;
        Ok(())
    }

    /// Drives retransmission and idle-peer eviction. Called once per
    /// main-loop tick.
    pub async fn tick(&self) {
        let mut resends: Vec<(SocketAddr, Vec<u8>)> = Vec::new();
        let mut timed_out: Vec<SocketAddr> = Vec::new();
        let now = Instant::now();

        for entry in self.inner.peers.iter() {
            let addr = *entry.key();
            let mut peer = entry.value().lock().unwrap();
            if now.duration_since(peer.last_active) > self.inner.peer_timeout {
                timed_out.push(addr);
                continue;
            }
            for (_, payload) in peer.due_retries(self.inner.retry_interval, self.inner.retry_cap, now) {
                resends.push((addr, payload));
            }
        }

        for (addr, payload) in resends {
            if let Err(err) = self.inner.socket.send_to(&payload, addr).await {
                warn!(%addr, %err, "retry send failed");
            }
        }

        for addr in timed_out {
            self.inner.peers.remove(&addr);
            let _ = self.inner.event_tx.send(RelayEvent::PeerTimeout(addr));
        }
    }
}

fn receiver_loop(
    socket: std::net::UdpSocket,
    peers: Arc<DashMap<SocketAddr, PeerEntry>>,
    received_tx: mpsc::UnboundedSender<(SocketAddr, Vec<u8>)>,
    event_tx: mpsc::UnboundedSender<RelayEvent>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (n, from) = match socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(err) => {
                warn!(%err, "socket receive error");
                continue;
            }
        };

        if n < HEADER_LEN {
            trace!(%from, len = n, "dropping short datagram");
            continue;
        }

        let header = match Header::decode(&buf[..n]) {
            Ok(h) => h,
            Err(_) => {
                trace!(%from, "dropping malformed header");
                continue;
            }
        };
        if header.version != relay_shared::wire::CURRENT_VERSION {
            trace!(%from, version = header.version, "dropping mismatched version");
            continue;
        }

        let entry = peers
            .entry(from)
            .or_insert_with(|| Mutex::new(Peer::new(Instant::now())));
        let mut peer = entry.lock().unwrap();
        peer.last_active = Instant::now();

        if header.is_ack {
            peer.ack(header.channel, header.sequence);
            continue;
        }

        let payload = buf[HEADER_LEN..n].to_vec();
        let should_ack = matches!(
            header.msg_type,
            MsgType::Reliable | MsgType::ReliableSequenced | MsgType::ReliableOrdered
        );

        let mut released: VecDeque<Vec<u8>> = VecDeque::new();
        let mut accepted = true;

        match header.msg_type {
            MsgType::Unreliable => {
                released.push_back(payload);
            }
            MsgType::UnreliableSequenced => {
                accepted = peer.accept_sequenced(header.channel, header.sequence);
                if accepted {
                    released.push_back(payload);
                }
            }
            MsgType::Reliable => {
                released.push_back(payload);
            }
            MsgType::ReliableSequenced => {
                accepted = peer.accept_sequenced(header.channel, header.sequence);
                if accepted {
                    released.push_back(payload);
                }
            }
            MsgType::ReliableOrdered => {
                for p in peer.reorder_push(header.channel, header.sequence, payload) {
                    released.push_back(p);
                }
            }
        }

        if should_ack {
            let ack = Header::ack(header.channel, header.sequence).encode();
            if let Err(err) = socket.send_to(&ack, from) {
                warn!(%from, %err, "ack send failed");
            }
        }

        drop(peer);
        drop(entry);

        if !released.is_empty() {
            for payload in released {
                if received_tx.send((from, payload)).is_err() {
                    return;
                }
            }
            let _ = event_tx.send(RelayEvent::MessageReceived(from));
        } else if !accepted {
            debug!(%from, channel = header.channel.0, seq = header.sequence.0, "dropped stale/duplicate frame");
        }
    }
}

/// Removes a peer's transport-level state immediately (used when the
/// relay core processes an explicit client-initiated disconnect, so
/// the Peer doesn't linger until the timeout sweep).
pub fn forget_peer(transport: &Transport, addr: SocketAddr) {
    transport.inner.peers.remove(&addr);
}
