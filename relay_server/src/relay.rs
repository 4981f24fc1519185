//! Relay core: client registry, join authentication, opcode dispatch,
//! and the rate-paced broadcast tick for position and skeletal
//! telemetry.
//!
//! Runs entirely on the async main thread. The transport engine hands
//! it `(SocketAddr, Vec<u8>)` application payloads and `RelayEvent`s;
//! all mutation of `Client` state happens here, never on the receiver
//! thread.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use relay_shared::codec::MessageBuffer;
use relay_shared::event::RelayEvent;
use relay_shared::identity::{IdentityClient, JoinRequest as IdentityJoinRequest};
use relay_shared::network_id::{NetworkId, NetworkIdAllocator};
use relay_shared::protocol::{
    self, ClientStateUpdate, JoinRequest, PeerJoined, PeerLeft, Roster, RosterEntry,
    OP_CLIENT_STATE, OP_DISCONNECT, OP_JOIN, OP_POSITION, OP_SKELETAL, OP_VOICE,
};
use relay_shared::reliability::Channel;
use relay_shared::wire::MsgType;

use crate::transport::{forget_peer, Transport};

const CHANNEL_CONTROL: Channel = Channel(0);
const CHANNEL_TELEMETRY: Channel = Channel(64);

/// A peer's requested rate toward one other peer, plus the last time
/// the server actually emitted an update to satisfy it. `None` means no
/// update has been sent yet, so the next broadcast tick is always due.
#[derive(Debug, Clone, Copy)]
struct RateEntry {
    rate: u8,
    last_sent: Option<Instant>,
}

/// One authenticated, joined client.
struct Client {
    network_id: NetworkId,
    user_id: String,
    can_hear: std::collections::HashSet<i16>,
    update_rate: HashMap<i16, RateEntry>,
    last_position_bytes: Option<Vec<u8>>,
    last_skeletal_bytes: Option<Vec<u8>>,
}

impl Client {
    fn new(network_id: NetworkId, user_id: String) -> Self {
        Self {
            network_id,
            user_id,
            can_hear: Default::default(),
            update_rate: HashMap::new(),
            last_position_bytes: None,
            last_skeletal_bytes: None,
        }
    }
}

/// The relay core: client registry keyed by remote endpoint plus the
/// identity-service client and id allocator.
pub struct Relay {
    clients: HashMap<SocketAddr, Client>,
    id_allocator: NetworkIdAllocator,
    identity: IdentityClient,
    transport: Transport,
}

impl Relay {
    pub fn new(transport: Transport, identity: IdentityClient) -> Self {
        Self {
            clients: HashMap::new(),
            id_allocator: NetworkIdAllocator::new(),
            identity,
            transport,
        }
    }

    /// Drains one batch of events + queued payloads and dispatches
    /// each. Called once per main-loop tick before the broadcast tick.
    pub async fn drain_and_dispatch(
        &mut self,
        received_rx: &mut tokio::sync::mpsc::UnboundedReceiver<(SocketAddr, Vec<u8>)>,
        event_rx: &mut tokio::sync::mpsc::UnboundedReceiver<RelayEvent>,
    ) {
        while let Ok(event) = event_rx.try_recv() {
            if let RelayEvent::PeerTimeout(addr) = event {
                self.handle_peer_timeout(addr).await;
            }
            // MessageReceived carries no extra work beyond draining
            // received_rx below; it exists for observability/ordering.
        }

        while let Ok((from, payload)) = received_rx.try_recv() {
            if let Err(err) = self.dispatch(from, &payload).await {
                warn!(%from, %err, "error dispatching frame");
            }
        }
    }

    async fn dispatch(&mut self, from: SocketAddr, payload: &[u8]) -> anyhow::Result<()> {
        let mut buf = MessageBuffer::from_bytes(payload);
        let opcode = protocol::peek_opcode(&mut buf)?;

        match opcode {
            OP_JOIN => self.handle_join(from, &mut buf).await?,
            OP_DISCONNECT => self.handle_disconnect(from).await,
            OP_CLIENT_STATE => self.handle_client_state(from, &mut buf)?,
            OP_VOICE => self.handle_voice(from, payload.to_vec()).await?,
            OP_POSITION => self.handle_position(from, buf.read_remaining(), false)?,
            OP_SKELETAL => self.handle_position(from, buf.read_remaining(), true)?,
            _ => self.broadcast_verbatim(from, payload).await?,
        }
        Ok(())
    }

    async fn handle_join(&mut self, from: SocketAddr, buf: &mut MessageBuffer) -> anyhow::Result<()> {
        let JoinRequest { user_id, token } = JoinRequest::decode(buf)?;

        let valid = self
            .identity
            .verify_join(&IdentityJoinRequest {
                userid: user_id.clone(),
                token,
            })
            .await
            .unwrap_or_else(|err| {
                warn!(%from, %err, "identity service call failed, treating as invalid");
                false
            });

        if !valid {
            return Ok(());
        }

        let network_id = self.id_allocator.allocate();
        info!(%from, %user_id, network_id = network_id.0, "client joined");

        // Roster snapshot of everyone already connected, unicast to the joiner.
        let roster = Roster {
            entries: self
                .clients
                .values()
                .map(|c| RosterEntry {
                    network_id: c.network_id,
                    user_id: c.user_id.clone(),
                })
                .collect(),
        };
        let mut roster_buf = MessageBuffer::new(128);
        roster.encode(&mut roster_buf);
        self.transport
            .send(from, MsgType::Reliable, CHANNEL_CONTROL, &roster_buf.to_bytes())
            .await?;

        // Announce the new joiner to everyone else already connected.
        let joined = PeerJoined {
            network_id,
            user_id: user_id.clone(),
        };
        let mut joined_buf = MessageBuffer::new(64);
        joined.encode(&mut joined_buf);
        let joined_bytes = joined_buf.to_bytes();
        for addr in self.clients.keys().copied().collect::<Vec<_>>() {
            self.transport
                .send(addr, MsgType::Reliable, CHANNEL_CONTROL, &joined_bytes)
                .await?;
        }

        self.clients.insert(from, Client::new(network_id, user_id));
        Ok(())
    }

    async fn handle_disconnect(&mut self, from: SocketAddr) {
        self.remove_client(from).await;
        // Client-initiated disconnect also clears Peer-level
        // reliability state: leaving it to the timeout sweep would
        // serve no purpose once the Client is gone.
        forget_peer(&self.transport, from);
    }

    async fn handle_peer_timeout(&mut self, from: SocketAddr) {
        self.remove_client(from).await;
    }

    async fn remove_client(&mut self, from: SocketAddr) {
        let Some(client) = self.clients.remove(&from) else {
            return;
        };
        let left = PeerLeft {
            network_id: client.network_id,
        };
        let mut buf = MessageBuffer::new(16);
        left.encode(&mut buf);
        let bytes = buf.to_bytes();
        for addr in self.clients.keys().copied().collect::<Vec<_>>() {
            if let Err(err) = self.transport.send(addr, MsgType::Reliable, CHANNEL_CONTROL, &bytes).await {
                warn!(%addr, %err, "failed to broadcast peer-left");
            }
        }
    }

    fn handle_client_state(&mut self, from: SocketAddr, buf: &mut MessageBuffer) -> anyhow::Result<()> {
        let Some(client) = self.clients.get_mut(&from) else {
            return Ok(());
        };
        let update = ClientStateUpdate::decode(buf)?;
        client.can_hear.clear();
        client.update_rate.clear();
        for entry in update.entries {
            if entry.can_hear {
                client.can_hear.insert(entry.peer_id);
            }
            client.update_rate.insert(
                entry.peer_id,
                RateEntry {
                    rate: entry.rate,
                    last_sent: None,
                },
            );
        }
        Ok(())
    }

    /// `frame` is the full received frame, opcode included, forwarded
    /// verbatim to every mutually-consenting recipient — receivers tell
    /// a relayed voice frame apart from other channel-0 reliable frames
    /// by its opcode, same as every other frame type.
    async fn handle_voice(&mut self, from: SocketAddr, frame: Vec<u8>) -> anyhow::Result<()> {
        let Some(sender) = self.clients.get(&from) else {
            return Ok(());
        };
        let sender_id = sender.network_id;

        let recipients: Vec<SocketAddr> = self
            .clients
            .iter()
            .filter(|(addr, client)| {
                **addr != from
                    && sender.can_hear.contains(&client.network_id.0)
                    && client.can_hear.contains(&sender_id.0)
            })
            .map(|(addr, _)| *addr)
            .collect();

        for addr in recipients {
            self.transport
                .send(addr, MsgType::ReliableSequenced, CHANNEL_CONTROL, &frame)
                .await?;
        }
        Ok(())
    }

    fn handle_position(&mut self, from: SocketAddr, payload: Vec<u8>, skeletal: bool) -> anyhow::Result<()> {
        let Some(client) = self.clients.get_mut(&from) else {
            return Ok(());
        };
        if skeletal {
            client.last_skeletal_bytes = Some(payload);
        } else {
            client.last_position_bytes = Some(payload);
        }
        Ok(())
    }

    async fn broadcast_verbatim(&mut self, from: SocketAddr, payload: &[u8]) -> anyhow::Result<()> {
        let targets: Vec<SocketAddr> = self.clients.keys().copied().filter(|a| *a != from).collect();
        for addr in targets {
            self.transport
                .send(addr, MsgType::Reliable, CHANNEL_CONTROL, payload)
                .await?;
        }
        Ok(())
    }

    /// Broadcast tick for position/skeletal telemetry: for every
    /// ordered pair of clients, checks mutual rate agreement and the
    /// receiver's own pacing, then re-wraps and sends the sender's
    /// cached payload.
    pub async fn broadcast_tick(&mut self) {
        let addrs: Vec<SocketAddr> = self.clients.keys().copied().collect();
        let now = Instant::now();

        for &sender_addr in &addrs {
            let (sender_id, position, skeletal) = {
                let sender = &self.clients[&sender_addr];
                (sender.network_id, sender.last_position_bytes.clone(), sender.last_skeletal_bytes.clone())
            };
            if position.is_none() && skeletal.is_none() {
                continue;
            }

            for &receiver_addr in &addrs {
                if receiver_addr == sender_addr {
                    continue;
                }

                let send_plan = {
                    let receiver = &self.clients[&receiver_addr];
                    let sender = &self.clients[&sender_addr];
                    let receiver_rate = receiver.update_rate.get(&sender_id.0);
                    let sender_rate = sender.update_rate.get(&receiver.network_id.0);
                    match (receiver_rate, sender_rate) {
                        (Some(r), Some(s)) => {
                            let effective_rate = r.rate.min(s.rate);
                            let interval = Duration::from_secs_f64(1.0 / effective_rate as f64);
                            let due = match r.last_sent {
                                Some(last) => now.duration_since(last) >= interval,
                                None => true,
                            };
                            if due {
                                Some(effective_rate)
                            } else {
                                None
                            }
                        }
                        _ => None,
                    }
                };

                let Some(effective_rate) = send_plan else {
                    continue;
                };

                if let Some(payload) = &position {
                    self.send_telemetry(receiver_addr, OP_POSITION, sender_id, effective_rate, payload)
                        .await;
                }
                if let Some(payload) = &skeletal {
                    self.send_telemetry(receiver_addr, OP_SKELETAL, sender_id, effective_rate, payload)
                        .await;
                }

                if let Some(entry) = self
                    .clients
                    .get_mut(&receiver_addr)
                    .and_then(|c| c.update_rate.get_mut(&sender_id.0))
                {
                    entry.last_sent = Some(now);
                }
            }
        }
    }

    async fn send_telemetry(
        &self,
        receiver_addr: SocketAddr,
        opcode: i16,
        sender_id: NetworkId,
        effective_rate: u8,
        cached_payload: &[u8],
    ) {
        // Cached payloads include the original 2-byte sender-id prefix
        // as received; strip it and re-wrap with the server's own
        // authoritative id so a peer can't spoof another's identity.
        let (_claimed, telemetry) = match protocol::strip_sender_prefix(cached_payload) {
            Ok(pair) => pair,
            Err(err) => {
                warn!(%err, "malformed cached telemetry payload");
                return;
            }
        };
        let frame = protocol::build_telemetry_frame(opcode, sender_id, effective_rate, &telemetry);
        if let Err(err) = self
            .transport
            .send(receiver_addr, MsgType::Reliable, CHANNEL_TELEMETRY, &frame.to_bytes())
            .await
        {
            warn!(%receiver_addr, %err, "telemetry send failed");
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}
