#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use shadowtun::conn::TunnelStream;
use shadowtun::logger::{LogLevel, Logger};

pub type DialResult = Pin<Box<dyn Future<Output = anyhow::Result<TunnelStream>> + Send>>;

/// Shorten verification and initial-read windows so failure-path tests
/// finish quickly. Must run before any config constant is first read; every
/// test calls it first.
pub fn init() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        std::env::set_var("ST_VERIFY_TIMEOUT", "300ms");
        std::env::set_var("ST_INITIAL_READ_TIMEOUT", "500ms");
    });
}

pub fn test_logger() -> Logger {
    Logger::new(LogLevel::None, false)
}

/// Upstream that echoes everything back, one task per connection.
pub async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 64 * 1024];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

/// Upstream that accepts and reads but never responds: TCP-alive with a
/// dead application session.
pub async fn spawn_silent_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                while matches!(stream.read(&mut buf).await, Ok(n) if n > 0) {}
            });
        }
    });
    addr
}

/// Factory dialing plain TCP to `addr`.
pub fn tcp_factory(addr: SocketAddr) -> impl Fn() -> DialResult + Send + Sync + 'static {
    move || {
        Box::pin(async move {
            let stream = TcpStream::connect(addr).await?;
            Ok(Box::pin(stream) as TunnelStream)
        })
    }
}

/// Factory that always fails, counting attempts.
pub fn failing_factory(
    attempts: Arc<AtomicUsize>,
) -> impl Fn() -> DialResult + Send + Sync + 'static {
    move || {
        let attempts = attempts.clone();
        Box::pin(async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("dial refused")
        })
    }
}

/// A connected loopback TCP pair.
pub async fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, accepted) = tokio::join!(TcpStream::connect(addr), async {
        listener.accept().await.map(|(s, _)| s)
    });
    (client.unwrap(), accepted.unwrap())
}

/// Poll `check` every 10 ms until it passes or `max_ms` elapses.
pub async fn wait_until(max_ms: u64, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_millis(max_ms);
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
