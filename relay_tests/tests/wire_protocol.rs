//! Wire-level end-to-end scenarios that don't need the relay core at
//! all: reliable-ordered reorder delivery, wraparound across the
//! sequence-number boundary, and the retry cap for a silent peer.
//! Exercised against a real `Transport` bound to loopback UDP.

mod common;

use std::time::Duration;

use relay_server::transport::{Transport, TransportQueues};
use relay_shared::wire::MsgType;

use common::RawPeer;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reliable_ordered_reorders_an_arbitrary_permutation() {
    let (transport, TransportQueues { mut received_rx, .. }) = Transport::bind(
        "127.0.0.1:0".parse().unwrap(),
        Duration::from_secs(10),
        5,
        Duration::from_secs(60),
    )
    .unwrap();
    let addr = transport.local_addr().unwrap();

    let peer = RawPeer::connect(addr).await;
    for seq in [3u8, 1, 2, 0] {
        peer.send_raw(MsgType::ReliableOrdered, 7, seq, &[seq]).await;
    }

    let mut delivered = Vec::new();
    for _ in 0..4 {
        let (_from, payload) = tokio::time::timeout(Duration::from_secs(1), received_rx.recv())
            .await
            .expect("receive within timeout")
            .expect("channel open");
        delivered.push(payload[0]);
    }

    assert_eq!(delivered, vec![0, 1, 2, 3]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reliable_ordered_delivers_across_the_wraparound_boundary() {
    let (transport, TransportQueues { mut received_rx, .. }) = Transport::bind(
        "127.0.0.1:0".parse().unwrap(),
        Duration::from_secs(10),
        5,
        Duration::from_secs(60),
    )
    .unwrap();
    let addr = transport.local_addr().unwrap();

    let peer = RawPeer::connect(addr).await;

    // Cold-start: the first frame on this channel becomes the watermark
    // regardless of its value.
    peer.send_raw(MsgType::ReliableOrdered, 0, 254, &[254]).await;
    let (_from, payload) = tokio::time::timeout(Duration::from_secs(1), received_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payload, vec![254]);

    for seq in [255u8, 0, 1] {
        peer.send_raw(MsgType::ReliableOrdered, 0, seq, &[seq]).await;
    }

    let mut delivered = Vec::new();
    for _ in 0..3 {
        let (_from, payload) = tokio::time::timeout(Duration::from_secs(1), received_rx.recv())
            .await
            .unwrap()
            .unwrap();
        delivered.push(payload[0]);
    }

    assert_eq!(delivered, vec![255, 0, 1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reliable_frame_to_a_silent_peer_is_retried_then_forgotten() -> anyhow::Result<()> {
    let (transport, TransportQueues { .. }) = Transport::bind(
        "127.0.0.1:0".parse()?,
        Duration::from_millis(50),
        3,
        Duration::from_secs(60),
    )?;

    // A peer entry only exists after some traffic; send once to a
    // sink address that will never ack, then drive the retry tick.
    let sink = tokio::net::UdpSocket::bind("127.0.0.1:0").await?;
    let sink_addr = sink.local_addr()?;
    transport
        .send(sink_addr, MsgType::Reliable, relay_shared::reliability::Channel(0), b"hello")
        .await?;

    // Drain whatever the sink receives (the initial send plus up to 3
    // retries = 4 total datagrams) without acking any of them.
    let drain = tokio::spawn(async move {
        let mut buf = [0u8; 16];
        let mut count = 0;
        while tokio::time::timeout(Duration::from_millis(500), sink.recv_from(&mut buf))
            .await
            .is_ok()
        {
            count += 1;
        }
        count
    });

    for _ in 0..6 {
        transport.tick().await;
        tokio::time::sleep(Duration::from_millis(60)).await;
    }

    let received_count = drain.await?;
    // Initial send + retry_cap(3) retries = at most 4 transmissions.
    assert!(received_count <= 4, "got {received_count} transmissions, expected at most 4");
    assert!(received_count >= 2, "expected at least one retry beyond the initial send");
    Ok(())
}
