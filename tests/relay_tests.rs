mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use shadowtun::relay::relay;
use shadowtun::stats::Stats;

#[tokio::test(flavor = "multi_thread")]
async fn test_relay_preserves_order_and_counts_bytes() {
    common::init();
    let (mut local_client, local_srv) = common::tcp_pair().await;
    let (tunnel_near, mut tunnel_far) = common::tcp_pair().await;

    let stats = Arc::new(Stats::new());
    let cancel = CancellationToken::new();

    let relay_task = {
        let stats = stats.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { relay(&cancel, local_srv, tunnel_near, &stats).await })
    };

    // local -> tunnel, byte-for-byte in order
    let outbound: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    local_client.write_all(&outbound).await.unwrap();

    let mut seen = vec![0u8; outbound.len()];
    tunnel_far.read_exact(&mut seen).await.unwrap();
    assert_eq!(seen, outbound);

    // tunnel -> local
    let inbound = b"response payload";
    tunnel_far.write_all(inbound).await.unwrap();
    let mut got = vec![0u8; inbound.len()];
    local_client.read_exact(&mut got).await.unwrap();
    assert_eq!(&got, inbound);

    // Local side closes; both directions wind down
    drop(local_client);
    let (bytes_out, bytes_in) = tokio::time::timeout(Duration::from_secs(2), relay_task)
        .await
        .expect("relay did not finish after local close")
        .unwrap();

    assert_eq!(bytes_out, outbound.len() as u64);
    assert_eq!(bytes_in, inbound.len() as u64);
    assert_eq!(
        stats.total_bytes.load(Ordering::Relaxed),
        (outbound.len() + inbound.len()) as u64
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancellation_unblocks_idle_relay() {
    common::init();
    let (mut local_client, local_srv) = common::tcp_pair().await;
    let (tunnel_near, mut tunnel_far) = common::tcp_pair().await;

    let stats = Arc::new(Stats::new());
    let cancel = CancellationToken::new();

    let relay_task = {
        let stats = stats.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { relay(&cancel, local_srv, tunnel_near, &stats).await })
    };

    // Some traffic, then silence with both sides still open
    local_client.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    tunnel_far.read_exact(&mut buf).await.unwrap();
    tunnel_far.write_all(b"pong").await.unwrap();
    local_client.read_exact(&mut buf).await.unwrap();

    cancel.cancel();

    let (bytes_out, bytes_in) = tokio::time::timeout(Duration::from_millis(500), relay_task)
        .await
        .expect("cancellation did not unblock the relay")
        .unwrap();

    assert_eq!(bytes_out, 4);
    assert_eq!(bytes_in, 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tunnel_close_ends_both_directions() {
    common::init();
    let (mut local_client, local_srv) = common::tcp_pair().await;
    let (tunnel_near, mut tunnel_far) = common::tcp_pair().await;

    let stats = Arc::new(Stats::new());
    let cancel = CancellationToken::new();

    let relay_task = {
        let stats = stats.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { relay(&cancel, local_srv, tunnel_near, &stats).await })
    };

    tunnel_far.write_all(b"server push").await.unwrap();
    let mut buf = [0u8; 11];
    local_client.read_exact(&mut buf).await.unwrap();

    // Remote end goes away entirely
    drop(tunnel_far);

    let (bytes_out, bytes_in) = tokio::time::timeout(Duration::from_secs(2), relay_task)
        .await
        .expect("relay did not finish after tunnel close")
        .unwrap();

    assert_eq!(bytes_out, 0);
    assert_eq!(bytes_in, 11);
}
