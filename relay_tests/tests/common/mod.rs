//! Shared test harness: a bare-metal "raw peer" that speaks the wire
//! protocol by hand (so tests can craft exact sequence numbers for the
//! wraparound/reorder scenarios) plus a helper that boots a real
//! `Transport` + `Relay` pair over loopback UDP and drives its tick
//! loop in the background.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use relay_server::relay::Relay;
use relay_server::transport::{Transport, TransportQueues};
use relay_shared::codec::MessageBuffer;
use relay_shared::identity::IdentityClient;
use relay_shared::reliability::{Channel, Sequence};
use relay_shared::wire::{Header, MsgType};

fn localhost(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

/// Spawns a real relay server (transport + relay core) on an ephemeral
/// loopback port and drives its tick loop on a background task for the
/// lifetime of the test process. Returns the bound address.
pub async fn spawn_relay_server(
    identity_base_url: &str,
    peer_timeout: Duration,
    retry_interval: Duration,
    retry_cap: u32,
) -> SocketAddr {
    let (transport, TransportQueues { mut received_rx, mut event_rx }) =
        Transport::bind(localhost(0), retry_interval, retry_cap, peer_timeout)
            .expect("bind relay transport");
    let addr = transport.local_addr().expect("local addr");

    let identity =
        IdentityClient::new(identity_base_url, Duration::from_secs(2)).expect("identity client");
    let mut relay = Relay::new(transport.clone(), identity);

    tokio::spawn(async move {
        loop {
            transport.tick().await;
            relay.drain_and_dispatch(&mut received_rx, &mut event_rx).await;
            relay.broadcast_tick().await;
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    });

    addr
}

/// A bare UDP endpoint that crafts headers and opcode frames by hand,
/// standing in for a real client during tests so sequence numbers can
/// be chosen explicitly (the reorder/wraparound scenarios name literal
/// sequence values, independent of whatever a `Peer`'s own outgoing
/// counter would assign).
pub struct RawPeer {
    socket: tokio::net::UdpSocket,
    pub server_addr: SocketAddr,
}

impl RawPeer {
    pub async fn connect(server_addr: SocketAddr) -> Self {
        let socket = tokio::net::UdpSocket::bind(localhost(0)).await.expect("bind raw peer");
        Self { socket, server_addr }
    }

    pub async fn send_raw(&self, msg_type: MsgType, channel: u8, seq: u8, payload: &[u8]) {
        let header = Header::data(msg_type, Channel(channel), Sequence(seq));
        let mut datagram = Vec::with_capacity(3 + payload.len());
        datagram.extend_from_slice(&header.encode());
        datagram.extend_from_slice(payload);
        self.socket
            .send_to(&datagram, self.server_addr)
            .await
            .expect("send raw datagram");
    }

    /// Sends an application frame whose payload is `opcode` followed by
    /// whatever `build` appends to the buffer.
    pub async fn send_opcode(
        &self,
        msg_type: MsgType,
        channel: u8,
        seq: u8,
        opcode: i16,
        build: impl FnOnce(&mut MessageBuffer),
    ) {
        let mut buf = MessageBuffer::new(64);
        buf.write_i16(opcode);
        build(&mut buf);
        self.send_raw(msg_type, channel, seq, &buf.to_bytes()).await;
    }

    /// Receives one raw datagram, decoding its header, and — acting as a
    /// conformant peer rather than a bare socket — acks it immediately
    /// if its discipline demands one. Without this, a reliable frame the
    /// test never acks would sit in the server's retry table and
    /// resend on its own schedule, interleaving with whatever the test
    /// is trying to observe. `None` on timeout.
    pub async fn recv_raw(&self, timeout: Duration) -> Option<(Header, Vec<u8>)> {
        let mut buf = vec![0u8; 65_507];
        let (n, _from) = tokio::time::timeout(timeout, self.socket.recv_from(&mut buf))
            .await
            .ok()?
            .ok()?;
        let header = Header::decode(&buf[..n]).ok()?;
        if !header.is_ack && header.msg_type.is_reliable() {
            let ack = Header::ack(header.channel, header.sequence).encode();
            let _ = self.socket.send_to(&ack, self.server_addr).await;
        }
        Some((header, buf[3..n].to_vec()))
    }

    /// Receives one application frame, skipping ack-only datagrams
    /// (3 bytes, `is_ack`), returning the decoded opcode and a buffer
    /// positioned right after it.
    pub async fn recv_opcode(&self, timeout: Duration) -> Option<(i16, MessageBuffer)> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (header, payload) = self.recv_raw(remaining).await?;
            if header.is_ack {
                continue;
            }
            let mut buf = MessageBuffer::from_bytes(&payload);
            let opcode = buf.read_i16().ok()?;
            return Some((opcode, buf));
        }
    }
}
