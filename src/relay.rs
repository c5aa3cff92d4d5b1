use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::config::{COPY_BUF_SIZE, IDLE_TIMEOUT, WRITE_TIMEOUT};
use crate::stats::Stats;

/// Copy data bidirectionally between the local stream and the tunnel until
/// either side closes or `cancel` fires. Returns (bytes_out, bytes_in):
/// local-to-tunnel and tunnel-to-local totals.
///
/// Each direction reads under an idle deadline and writes under a write
/// deadline. The first copy to return cancels a flow-local token, which the
/// other copy observes on its next poll; process-wide cancellation feeds the
/// same token through its parent. Both streams are dropped when this
/// function returns, which closes them.
pub async fn relay<A, B>(cancel: &CancellationToken, local: A, tunnel: B, stats: &Stats) -> (u64, u64)
where
    A: AsyncRead + AsyncWrite + Send,
    B: AsyncRead + AsyncWrite + Send,
{
    let stop = cancel.child_token();
    let (mut local_r, mut local_w) = tokio::io::split(local);
    let (mut tunnel_r, mut tunnel_w) = tokio::io::split(tunnel);

    let outbound = async {
        let n = copy_conn(&mut local_r, &mut tunnel_w, stats, &stop).await;
        stop.cancel();
        let _ = tunnel_w.shutdown().await;
        n
    };

    let inbound = async {
        let n = copy_conn(&mut tunnel_r, &mut local_w, stats, &stop).await;
        stop.cancel();
        let _ = local_w.shutdown().await;
        n
    };

    tokio::join!(outbound, inbound)
}

/// One-way copy with idle and write deadlines. Returns the running total on
/// the first read error (EOF, idle timeout, cancellation) or write failure.
async fn copy_conn<R, W>(src: &mut R, dst: &mut W, stats: &Stats, stop: &CancellationToken) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUF_SIZE()];
    let mut total = 0u64;

    loop {
        let n = tokio::select! {
            _ = stop.cancelled() => return total,
            result = tokio::time::timeout(IDLE_TIMEOUT(), src.read(&mut buf)) => {
                match result {
                    Ok(Ok(n)) if n > 0 => n,
                    // EOF, read error, or idle timeout
                    _ => return total,
                }
            }
        };

        let write = async {
            dst.write_all(&buf[..n]).await?;
            dst.flush().await
        };
        match tokio::time::timeout(WRITE_TIMEOUT(), write).await {
            Ok(Ok(())) => {
                total += n as u64;
                stats.add_bytes(n as u64);
            }
            _ => return total,
        }
    }
}
