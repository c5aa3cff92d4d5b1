use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use url::Url;

use crate::config::{
    parse_duration, COPY_BUF_SIZE, DEFAULT_BACKOFF, DEFAULT_POOL_SIZE, DEFAULT_STATS_INTERVAL,
    DEFAULT_TTL, INITIAL_READ_TIMEOUT, WRITE_TIMEOUT,
};
use crate::dialer::TunnelDialer;
use crate::logger::Logger;
use crate::pool::ConnPool;
use crate::relay::relay;
use crate::stats::{format_bytes, format_duration, Stats};
use crate::tunnel;
use crate::{log_debug, log_info, log_warn};

/// Client parameters parsed from a `client://listen/host:port?...` URL.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub listen_addr: String,
    pub server_addr: String,
    pub sni: String,
    pub pool_size: usize,
    pub ttl: Duration,
    pub backoff: Duration,
    pub stats_interval: Duration,
}

impl ClientConfig {
    pub fn from_url(parsed_url: &Url) -> anyhow::Result<Self> {
        let host = parsed_url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("client: missing listen host"))?;
        let port = parsed_url
            .port()
            .ok_or_else(|| anyhow::anyhow!("client: missing listen port"))?;
        let listen_addr = format!("{}:{}", host, port);

        let server_addr = parsed_url.path().trim_start_matches('/').to_string();
        if server_addr.is_empty() {
            anyhow::bail!("client: missing server address in URL path");
        }
        if !server_addr.contains(':') {
            anyhow::bail!("client: server address must be host:port, got {:?}", server_addr);
        }

        let query = |key: &str| {
            parsed_url
                .query_pairs()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.to_string())
        };

        let sni = query("sni").ok_or_else(|| anyhow::anyhow!("client: missing sni parameter"))?;

        Ok(Self {
            listen_addr,
            server_addr,
            sni,
            pool_size: query("pool")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_POOL_SIZE),
            ttl: query("ttl")
                .and_then(|v| parse_duration(&v))
                .unwrap_or(DEFAULT_TTL),
            backoff: query("backoff")
                .and_then(|v| parse_duration(&v))
                .unwrap_or(DEFAULT_BACKOFF),
            stats_interval: query("stats")
                .and_then(|v| parse_duration(&v))
                .unwrap_or(DEFAULT_STATS_INTERVAL),
        })
    }
}

pub struct Client {
    config: ClientConfig,
    stats: Arc<Stats>,
    logger: Logger,
}

impl Client {
    pub fn new(parsed_url: Url, logger: Logger) -> anyhow::Result<Self> {
        let config = ClientConfig::from_url(&parsed_url)?;
        Ok(Self {
            config,
            stats: Arc::new(Stats::new()),
            logger,
        })
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let dialer = Arc::new(TunnelDialer::new(
            self.config.server_addr.clone(),
            &self.config.sni,
            self.logger.clone(),
        )?);

        let cancel = CancellationToken::new();

        let pool = {
            let dialer = dialer.clone();
            Arc::new(ConnPool::new(
                self.config.pool_size,
                self.config.ttl,
                self.config.backoff,
                move || {
                    let dialer = dialer.clone();
                    async move { dialer.dial().await }
                },
                cancel.clone(),
                self.stats.clone(),
                self.logger.clone(),
            ))
        };
        pool.start();

        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("run: bind {} failed: {}", self.config.listen_addr, e))?;

        log_info!(self.logger, "shadowtun client started");
        log_info!(self.logger, "  Listen: {}", self.config.listen_addr);
        log_info!(self.logger, "  Server: {}", self.config.server_addr);
        log_info!(self.logger, "  SNI: {}", self.config.sni);
        log_info!(
            self.logger,
            "  Pool size: {}, TTL: {}, Backoff: {}",
            self.config.pool_size,
            format_duration(self.config.ttl),
            format_duration(self.config.backoff)
        );
        if !self.config.stats_interval.is_zero() {
            log_info!(
                self.logger,
                "  Stats interval: {}",
                format_duration(self.config.stats_interval)
            );
        }

        let cancel_int = cancel.clone();
        let logger_int = self.logger.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            log_info!(logger_int, "Shutting down...");
            cancel_int.cancel();
        });

        #[cfg(unix)]
        {
            let cancel_term = cancel.clone();
            tokio::spawn(async move {
                let mut sig =
                    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                        .unwrap();
                sig.recv().await;
                cancel_term.cancel();
            });

            // SIGUSR1 dumps the full stats block
            let cancel_usr1 = cancel.clone();
            let pool_usr1 = pool.clone();
            let stats_usr1 = self.stats.clone();
            tokio::spawn(async move {
                let mut sig = tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::user_defined1(),
                )
                .unwrap();
                loop {
                    tokio::select! {
                        _ = cancel_usr1.cancelled() => return,
                        received = sig.recv() => {
                            if received.is_none() {
                                return;
                            }
                            let (avail, cap) = pool_usr1.available();
                            println!("{}", stats_usr1.snapshot(avail, cap));
                        }
                    }
                }
            });
        }

        if !self.config.stats_interval.is_zero() {
            let cancel_tick = cancel.clone();
            let pool_tick = pool.clone();
            let stats_tick = self.stats.clone();
            let logger_tick = self.logger.clone();
            let period = self.config.stats_interval;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = cancel_tick.cancelled() => return,
                        _ = interval.tick() => {
                            let (avail, cap) = pool_tick.available();
                            stats_tick.snapshot(avail, cap).log(&logger_tick);
                        }
                    }
                }
            });
        }

        let tracker = TaskTracker::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = listener.accept() => {
                    match result {
                        Ok((local, peer)) => {
                            tracker.spawn(handle_flow(
                                cancel.clone(),
                                pool.clone(),
                                self.stats.clone(),
                                self.logger.clone(),
                                local,
                                peer,
                            ));
                        }
                        Err(e) => {
                            log_warn!(self.logger, "Accept error: {}", e);
                        }
                    }
                }
            }
        }

        log_info!(self.logger, "Waiting for connections to close...");
        tracker.close();
        tracker.wait().await;
        pool.stop().await;

        let (avail, cap) = pool.available();
        println!("{}", self.stats.snapshot(avail, cap));

        log_info!(self.logger, "Shutdown complete");
        Ok(())
    }
}

/// Handle one accepted local connection end-to-end: read the client's first
/// bytes, acquire a verified tunnel, forward the server's first response,
/// then relay until either side closes or shutdown fires. Takes ownership
/// of the stream and returns when the flow terminates.
pub async fn handle_flow(
    cancel: CancellationToken,
    pool: Arc<ConnPool>,
    stats: Arc<Stats>,
    logger: Logger,
    local: TcpStream,
    peer: SocketAddr,
) {
    let started = Instant::now();
    stats.conn_start();
    run_flow(&cancel, &pool, &stats, &logger, local, peer, started).await;
    stats.conn_end();
    stats.conn_lifetime.record(started.elapsed());
}

async fn run_flow(
    cancel: &CancellationToken,
    pool: &ConnPool,
    stats: &Stats,
    logger: &Logger,
    mut local: TcpStream,
    peer: SocketAddr,
    started: Instant,
) {
    log_debug!(logger, "New connection from {}", peer);

    // Initial data from the local client, replayed on stale pool connections
    // during verification
    let mut initial_buf = vec![0u8; COPY_BUF_SIZE()];
    let n = match tokio::time::timeout(INITIAL_READ_TIMEOUT(), local.read(&mut initial_buf)).await {
        Ok(Ok(n)) if n > 0 => n,
        Ok(Ok(_)) => {
            log_debug!(logger, "No initial data from {}: closed", peer);
            stats.add_conn_error();
            return;
        }
        Ok(Err(e)) => {
            log_debug!(logger, "No initial data from {}: {}", peer, e);
            stats.add_conn_error();
            return;
        }
        Err(_) => {
            log_debug!(logger, "No initial data from {}: timed out", peer);
            stats.add_conn_error();
            return;
        }
    };
    let initial_data = &initial_buf[..n];

    let (tunnel, first_response) =
        match tunnel::acquire(cancel, pool, stats, logger, initial_data).await {
            Ok(v) => v,
            Err(e) => {
                log_warn!(logger, "Failed to get tunnel: {}", e);
                stats.add_conn_error();
                return;
            }
        };

    // Forward the server's first response to the local client before any
    // relayed bytes
    let forward = async {
        local.write_all(&first_response).await?;
        local.flush().await
    };
    match tokio::time::timeout(WRITE_TIMEOUT(), forward).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            log_debug!(logger, "Failed to forward response to client: {}", e);
            stats.add_conn_error();
            return;
        }
        Err(_) => {
            log_debug!(logger, "Failed to forward response to client: timed out");
            stats.add_conn_error();
            return;
        }
    }

    let (bytes_out, bytes_in) = relay(cancel, local, tunnel.stream, stats).await;

    log_info!(
        logger,
        "Connection closed: {} out, {} in, {}",
        format_bytes(initial_data.len() as u64 + bytes_out, true),
        format_bytes(first_response.len() as u64 + bytes_in, true),
        format_duration(started.elapsed())
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_url() {
        let url = Url::parse(
            "client://127.0.0.1:2222/example.com:8443?sni=www.google.com&pool=8&ttl=20s&backoff=2s&stats=30s",
        )
        .unwrap();
        let config = ClientConfig::from_url(&url).unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:2222");
        assert_eq!(config.server_addr, "example.com:8443");
        assert_eq!(config.sni, "www.google.com");
        assert_eq!(config.pool_size, 8);
        assert_eq!(config.ttl, Duration::from_secs(20));
        assert_eq!(config.backoff, Duration::from_secs(2));
        assert_eq!(config.stats_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_config_defaults() {
        let url = Url::parse("client://0.0.0.0:1080/server.test:443?sni=cdn.test").unwrap();
        let config = ClientConfig::from_url(&url).unwrap();

        assert_eq!(config.pool_size, DEFAULT_POOL_SIZE);
        assert_eq!(config.ttl, DEFAULT_TTL);
        assert_eq!(config.backoff, DEFAULT_BACKOFF);
        assert!(config.stats_interval.is_zero());
    }

    #[test]
    fn test_config_rejects_incomplete_urls() {
        let no_server = Url::parse("client://127.0.0.1:2222?sni=x.test").unwrap();
        assert!(ClientConfig::from_url(&no_server).is_err());

        let no_sni = Url::parse("client://127.0.0.1:2222/server.test:443").unwrap();
        assert!(ClientConfig::from_url(&no_sni).is_err());

        let no_port = Url::parse("client://127.0.0.1:2222/server-without-port?sni=x.test").unwrap();
        assert!(ClientConfig::from_url(&no_port).is_err());
    }
}
