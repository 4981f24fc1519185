//! Standalone relay server binary.
//!
//! Usage:
//!   cargo run -p relay_server --bin relay-server -- [port]
//!
//! Binds `0.0.0.0:<port>` (default 31130) and runs the transport
//! engine's blocking receiver thread plus a main-thread busy loop: a
//! 1ms sleep between calls to the transport's retry/timeout tick and
//! the relay core's dispatch + broadcast tick.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::Context;
use relay_server::relay::Relay;
use relay_server::transport::{Transport, TransportQueues};
use relay_shared::config::RelayConfig;
use relay_shared::identity::IdentityClient;
use tracing::info;

fn parse_args(defaults: &RelayConfig) -> u16 {
    let mut port = defaults.bind_port;
    let args: Vec<String> = std::env::args().collect();
    if let Some(arg) = args.get(1) {
        if let Ok(parsed) = arg.parse() {
            port = parsed;
        }
    }
    port
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = RelayConfig::default();
    let port = parse_args(&cfg);
    let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);

    info!(
        %bind_addr,
        identity_base_url = %cfg.identity_base_url,
        peer_timeout_secs = cfg.peer_timeout_secs,
        "starting relay server"
    );

    let (transport, TransportQueues { mut received_rx, mut event_rx }) = Transport::bind(
        bind_addr,
        Duration::from_secs(cfg.retry_interval_secs),
        cfg.retry_cap,
        Duration::from_secs(cfg.peer_timeout_secs),
    )
    .context("bind relay socket")?;
    let local = transport.local_addr()?;
    info!(%local, "relay server listening");

    let identity = IdentityClient::new(
        cfg.identity_base_url.clone(),
        Duration::from_secs(cfg.identity_timeout_secs),
    )
    .context("build identity client")?;

    let mut relay = Relay::new(transport.clone(), identity);

    // Main loop: the receiver thread runs independently; this loop
    // drains what it produced, dispatches application frames, paces the
    // position/skeletal broadcast tick, and services retries/timeouts —
    // all on a 1ms cadence, with no event-driven wakeups, to keep
    // broadcast pacing and retry timing independent of arrival bursts.
    loop {
        transport.tick().await;
        relay.drain_and_dispatch(&mut received_rx, &mut event_rx).await;
        relay.broadcast_tick().await;

        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
