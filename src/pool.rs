use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{DIAL_TIMEOUT, POOL_STOP_GRACE};
use crate::conn::TunnelStream;
use crate::logger::Logger;
use crate::stats::Stats;
use crate::{log_debug, log_warn};

/// Factory that produces a fresh tunnel stream. The pool is oblivious to the
/// transport behind it; any failure is treated as "retry after backoff".
pub type DialFn = Arc<
    dyn Fn() -> Pin<Box<dyn Future<Output = anyhow::Result<TunnelStream>> + Send>> + Send + Sync,
>;

/// A warm connection sitting in the ready queue.
struct PooledConn {
    stream: TunnelStream,
    created_at: Instant,
    connect_time: Duration,
}

/// A connection checked out of the pool. There is no return path: the
/// borrower either consumes it in a flow or drops it.
pub struct BorrowedConn {
    pub stream: TunnelStream,
    /// Time the connection sat in the ready queue before borrow.
    pub pool_age: Duration,
    /// Time the factory took to establish it.
    pub connect_time: Duration,
    /// True if it was warm, false if dialed on demand.
    pub from_pool: bool,
}

impl std::fmt::Debug for BorrowedConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BorrowedConn")
            .field("pool_age", &self.pool_age)
            .field("connect_time", &self.connect_time)
            .field("from_pool", &self.from_pool)
            .finish_non_exhaustive()
    }
}

/// Fixed-size pool of pre-established tunnel connections. One producer task
/// per slot keeps the ready queue full; consumers take the freshest-eligible
/// connection or dial on demand when the queue is empty.
pub struct ConnPool {
    inner: Arc<PoolInner>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

struct PoolInner {
    capacity: usize,
    ttl: Duration,
    backoff: Duration,
    dial_fn: DialFn,

    ready: Mutex<VecDeque<PooledConn>>,
    ready_count: AtomicUsize,
    slot_notify: Notify,

    cancel: CancellationToken,
    shutdown: AtomicBool,

    stats: Arc<Stats>,
    logger: Logger,
}

impl ConnPool {
    /// `cancel` is the process-wide shutdown token; producers observe it and
    /// exit without waiting for `stop()`. The pool works on a child of it so
    /// that `stop()` never cancels the caller's token.
    pub fn new<F, Fut>(
        capacity: usize,
        ttl: Duration,
        backoff: Duration,
        dial_fn: F,
        cancel: CancellationToken,
        stats: Arc<Stats>,
        logger: Logger,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<TunnelStream>> + Send + 'static,
    {
        let dial_fn: DialFn = Arc::new(move || Box::pin(dial_fn()));
        Self {
            inner: Arc::new(PoolInner {
                capacity,
                ttl,
                backoff,
                dial_fn,
                ready: Mutex::new(VecDeque::with_capacity(capacity)),
                ready_count: AtomicUsize::new(0),
                slot_notify: Notify::new(),
                cancel: cancel.child_token(),
                shutdown: AtomicBool::new(false),
                stats,
                logger,
            }),
            workers: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Spawn one producer per slot.
    pub fn start(&self) {
        let mut workers = self.workers.lock().unwrap();
        for id in 0..self.inner.capacity {
            workers.push(tokio::spawn(self.inner.clone().worker(id)));
        }
    }

    /// Shut the pool down: stop producers (bounded by a grace period), then
    /// drain and drop any remaining warm connections. Not restartable; `get`
    /// fails afterwards.
    pub async fn stop(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.cancel.cancel();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock().unwrap());
        let join_all = async {
            for h in handles {
                let _ = h.await;
            }
        };
        if tokio::time::timeout(POOL_STOP_GRACE(), join_all).await.is_err() {
            log_warn!(self.inner.logger, "Pool shutdown timed out, abandoning workers");
        }

        let mut queue = self.inner.ready.lock().await;
        let drained = queue.len();
        queue.clear();
        self.inner.ready_count.store(0, Ordering::SeqCst);
        if drained > 0 {
            log_debug!(self.inner.logger, "Pool drained {} warm connections", drained);
        }
    }

    /// Non-blocking view of (ready, capacity).
    pub fn available(&self) -> (usize, usize) {
        (
            self.inner.ready_count.load(Ordering::SeqCst),
            self.inner.capacity,
        )
    }

    /// Borrow a connection. Warm connections past their TTL are dropped on
    /// the spot; an empty queue falls through to a synchronous dial bounded
    /// by `timeout`.
    pub async fn get(&self, timeout: Duration) -> anyhow::Result<BorrowedConn> {
        self.inner.get(timeout).await
    }
}

impl PoolInner {
    /// One producer slot: dial, then hand the connection to the ready queue.
    /// A connection that cannot be enqueued within one TTL is discarded; it
    /// would be rejected as expired on checkout anyway.
    async fn worker(self: Arc<Self>, id: usize) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) || self.cancel.is_cancelled() {
                return;
            }

            let start = Instant::now();
            let dialed = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = tokio::time::timeout(DIAL_TIMEOUT(), (self.dial_fn)()) => {
                    match result {
                        Ok(inner) => inner,
                        Err(_) => Err(anyhow::anyhow!("worker: dial timed out")),
                    }
                }
            };
            let connect_time = start.elapsed();

            let stream = match dialed {
                Ok(stream) => stream,
                Err(e) => {
                    if self.shutdown.load(Ordering::SeqCst) || self.cancel.is_cancelled() {
                        return;
                    }
                    self.stats.pool_failed.fetch_add(1, Ordering::Relaxed);
                    log_warn!(self.logger, "Pool connect failed: {}", e);
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = tokio::time::sleep(self.backoff) => {}
                    }
                    continue;
                }
            };

            self.stats.pool_created.fetch_add(1, Ordering::Relaxed);
            self.stats.connect_time.record(connect_time);

            let mut pending = Some(PooledConn {
                stream,
                created_at: Instant::now(),
                connect_time,
            });

            // Bounded wait for queue room; give up after one TTL.
            let deadline = tokio::time::Instant::now() + self.ttl;
            loop {
                {
                    let mut queue = self.ready.lock().await;
                    if queue.len() < self.capacity {
                        queue.push_back(pending.take().unwrap());
                        self.ready_count.store(queue.len(), Ordering::SeqCst);
                        log_debug!(self.logger, "Worker {}: connection pooled", id);
                        break;
                    }
                }
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = self.slot_notify.notified() => {}
                    _ = tokio::time::sleep_until(deadline) => {
                        self.stats.pool_discarded.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                }
            }
        }
    }

    async fn get(&self, timeout: Duration) -> anyhow::Result<BorrowedConn> {
        let wait_start = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                anyhow::bail!("get: pool is shut down");
            }

            let popped = {
                let mut queue = self.ready.lock().await;
                let pc = queue.pop_front();
                self.ready_count.store(queue.len(), Ordering::SeqCst);
                pc
            };

            match popped {
                Some(pc) => {
                    self.slot_notify.notify_one();

                    let pool_age = pc.created_at.elapsed();
                    if pool_age <= self.ttl {
                        self.stats.pool_hits.fetch_add(1, Ordering::Relaxed);
                        self.stats.pool_age.record(pool_age);
                        self.stats.pool_wait.record(wait_start.elapsed());
                        return Ok(BorrowedConn {
                            stream: pc.stream,
                            pool_age,
                            connect_time: pc.connect_time,
                            from_pool: true,
                        });
                    }
                    // Expired in the queue; drop and try the next one
                    self.stats.pool_expired.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                None => {
                    self.stats.pool_misses.fetch_add(1, Ordering::Relaxed);
                    let start = Instant::now();
                    let stream = tokio::select! {
                        _ = self.cancel.cancelled() => anyhow::bail!("get: pool is shut down"),
                        result = tokio::time::timeout_at(deadline, (self.dial_fn)()) => {
                            result.map_err(|_| anyhow::anyhow!("get: dial timed out"))??
                        }
                    };
                    let connect_time = start.elapsed();
                    self.stats.connect_time.record(connect_time);
                    self.stats.pool_wait.record(wait_start.elapsed());
                    return Ok(BorrowedConn {
                        stream,
                        pool_age: Duration::ZERO,
                        connect_time,
                        from_pool: false,
                    });
                }
            }
        }
    }
}
