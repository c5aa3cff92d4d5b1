use std::sync::atomic::Ordering;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::config::{COPY_BUF_SIZE, GET_TIMEOUT, MAX_RETRIES, VERIFY_TIMEOUT};
use crate::log_debug;
use crate::logger::Logger;
use crate::pool::{BorrowedConn, ConnPool};
use crate::stats::{format_duration, Stats};

/// Borrow a pool connection and verify it with a full round-trip: write the
/// client's initial data and read the server's response. TCP-dead
/// connections fail on write; app-dead connections (tunnel session silently
/// expired upstream) accept the write and never respond, so only the read
/// catches them. Retries on a fresh connection up to the retry limit.
///
/// There is no read-only probe: the tunnel framing is stateful and a timed
/// out partial read would corrupt the stream.
pub async fn acquire(
    cancel: &CancellationToken,
    pool: &ConnPool,
    stats: &Stats,
    logger: &Logger,
    initial_data: &[u8],
) -> anyhow::Result<(BorrowedConn, Vec<u8>)> {
    let mut resp_buf = vec![0u8; COPY_BUF_SIZE()];

    for attempt in 1..=MAX_RETRIES() {
        if cancel.is_cancelled() {
            anyhow::bail!("acquire: shutting down");
        }

        let mut tunnel = pool.get(GET_TIMEOUT()).await?;

        if tunnel.from_pool {
            log_debug!(
                logger,
                "Tunnel: pooled (age={}, rtt={})",
                format_duration(tunnel.pool_age),
                format_duration(tunnel.connect_time)
            );
        } else {
            log_debug!(
                logger,
                "Tunnel: new (rtt={})",
                format_duration(tunnel.connect_time)
            );
        }

        // Write - catches TCP-dead connections
        let write = async {
            tunnel.stream.write_all(initial_data).await?;
            tunnel.stream.flush().await
        };
        match tokio::time::timeout(VERIFY_TIMEOUT(), write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                stats.pool_stale.fetch_add(1, Ordering::Relaxed);
                log_debug!(
                    logger,
                    "Stale tunnel (write failed, {}/{}): {}",
                    attempt,
                    MAX_RETRIES(),
                    e
                );
                continue;
            }
            Err(_) => {
                stats.pool_stale.fetch_add(1, Ordering::Relaxed);
                log_debug!(
                    logger,
                    "Stale tunnel (write timed out, {}/{})",
                    attempt,
                    MAX_RETRIES()
                );
                continue;
            }
        }

        // Read - catches app-dead connections
        let read_result =
            tokio::time::timeout(VERIFY_TIMEOUT(), tunnel.stream.read(&mut resp_buf)).await;
        match read_result {
            Ok(Ok(n)) if n > 0 => return Ok((tunnel, resp_buf[..n].to_vec())),
            Ok(Ok(_)) => {
                stats.pool_stale.fetch_add(1, Ordering::Relaxed);
                log_debug!(
                    logger,
                    "Stale tunnel (closed by peer, {}/{})",
                    attempt,
                    MAX_RETRIES()
                );
            }
            Ok(Err(e)) => {
                stats.pool_stale.fetch_add(1, Ordering::Relaxed);
                log_debug!(
                    logger,
                    "Stale tunnel (read failed, {}/{}): {}",
                    attempt,
                    MAX_RETRIES(),
                    e
                );
            }
            Err(_) => {
                stats.pool_stale.fetch_add(1, Ordering::Relaxed);
                log_debug!(
                    logger,
                    "Stale tunnel (no response, {}/{})",
                    attempt,
                    MAX_RETRIES()
                );
            }
        }
    }

    anyhow::bail!("all {} pool connections stale", MAX_RETRIES())
}
