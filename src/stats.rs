use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::log_event;
use crate::logger::Logger;

/// Update `a` to min(a, v) atomically.
fn atomic_min(a: &AtomicI64, v: i64) {
    let mut cur = a.load(Ordering::Relaxed);
    while v < cur {
        match a.compare_exchange_weak(cur, v, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return,
            Err(now) => cur = now,
        }
    }
}

/// Update `a` to max(a, v) atomically.
fn atomic_max(a: &AtomicI64, v: i64) {
    let mut cur = a.load(Ordering::Relaxed);
    while v > cur {
        match a.compare_exchange_weak(cur, v, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return,
            Err(now) => cur = now,
        }
    }
}

/// Running sum/count/min/max over durations, recorded lock-free in
/// nanoseconds. Min starts at i64::MAX; count == 0 means no data.
#[derive(Debug)]
pub struct DurationStat {
    total: AtomicI64,
    count: AtomicU64,
    min: AtomicI64,
    max: AtomicI64,
}

impl DurationStat {
    fn new() -> Self {
        Self {
            total: AtomicI64::new(0),
            count: AtomicU64::new(0),
            min: AtomicI64::new(i64::MAX),
            max: AtomicI64::new(0),
        }
    }

    pub fn record(&self, d: Duration) {
        let ns = d.as_nanos() as i64;
        self.total.fetch_add(ns, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        atomic_min(&self.min, ns);
        atomic_max(&self.max, ns);
    }

    fn summary(&self) -> DurationSummary {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return DurationSummary::default();
        }
        DurationSummary {
            avg: Duration::from_nanos((self.total.load(Ordering::Relaxed) / count as i64) as u64),
            min: Duration::from_nanos(self.min.load(Ordering::Relaxed) as u64),
            max: Duration::from_nanos(self.max.load(Ordering::Relaxed) as u64),
            count,
        }
    }
}

/// Point-in-time view of one DurationStat.
#[derive(Debug, Clone, Copy, Default)]
pub struct DurationSummary {
    pub avg: Duration,
    pub min: Duration,
    pub max: Duration,
    pub count: u64,
}

/// Performance counters for the tunnel client. All fields are atomic;
/// individual updates are consistent but snapshots may observe counters at
/// slightly different instants.
#[derive(Debug)]
pub struct Stats {
    // Pool counters
    pub pool_created: AtomicU64,
    pub pool_expired: AtomicU64,
    pub pool_failed: AtomicU64,
    pub pool_discarded: AtomicU64,
    pub pool_stale: AtomicU64,
    pub pool_hits: AtomicU64,
    pub pool_misses: AtomicU64,

    // Connection counters
    pub active_conns: AtomicI64,
    peak_conns: AtomicI64,
    pub total_conns: AtomicU64,
    pub total_bytes: AtomicU64,
    pub conn_errors: AtomicU64,

    // Timing histograms
    pub connect_time: DurationStat,
    pub conn_lifetime: DurationStat,
    pub pool_age: DurationStat,
    pub pool_wait: DurationStat,

    start_time: Instant,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            pool_created: AtomicU64::new(0),
            pool_expired: AtomicU64::new(0),
            pool_failed: AtomicU64::new(0),
            pool_discarded: AtomicU64::new(0),
            pool_stale: AtomicU64::new(0),
            pool_hits: AtomicU64::new(0),
            pool_misses: AtomicU64::new(0),
            active_conns: AtomicI64::new(0),
            peak_conns: AtomicI64::new(0),
            total_conns: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            conn_errors: AtomicU64::new(0),
            connect_time: DurationStat::new(),
            conn_lifetime: DurationStat::new(),
            pool_age: DurationStat::new(),
            pool_wait: DurationStat::new(),
            start_time: Instant::now(),
        }
    }

    /// Mark a connection as started.
    pub fn conn_start(&self) {
        self.total_conns.fetch_add(1, Ordering::Relaxed);
        let active = self.active_conns.fetch_add(1, Ordering::Relaxed) + 1;
        atomic_max(&self.peak_conns, active);
    }

    /// Mark a connection as ended.
    pub fn conn_end(&self) {
        self.active_conns.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn add_bytes(&self, n: u64) {
        self.total_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_conn_error(&self) {
        self.conn_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Create a point-in-time snapshot. Pool availability comes from the
    /// caller since the queue belongs to the pool.
    pub fn snapshot(&self, pool_available: usize, pool_size: usize) -> StatsSnapshot {
        let hits = self.pool_hits.load(Ordering::Relaxed);
        let misses = self.pool_misses.load(Ordering::Relaxed);
        let hit_rate = if hits + misses > 0 {
            hits as f64 / (hits + misses) as f64 * 100.0
        } else {
            0.0
        };

        StatsSnapshot {
            uptime: self.start_time.elapsed(),
            pool_size,
            pool_available,
            pool_created: self.pool_created.load(Ordering::Relaxed),
            pool_expired: self.pool_expired.load(Ordering::Relaxed),
            pool_failed: self.pool_failed.load(Ordering::Relaxed),
            pool_discarded: self.pool_discarded.load(Ordering::Relaxed),
            pool_stale: self.pool_stale.load(Ordering::Relaxed),
            pool_hits: hits,
            pool_misses: misses,
            pool_hit_rate: hit_rate,
            pool_wait: self.pool_wait.summary(),
            active_conns: self.active_conns.load(Ordering::Relaxed),
            peak_conns: self.peak_conns.load(Ordering::Relaxed),
            total_conns: self.total_conns.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            conn_errors: self.conn_errors.load(Ordering::Relaxed),
            connect_time: self.connect_time.summary(),
            conn_lifetime: self.conn_lifetime.summary(),
            pool_age: self.pool_age.summary(),
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot of all stats. Pure value type.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub uptime: Duration,

    pub pool_size: usize,
    pub pool_available: usize,
    pub pool_created: u64,
    pub pool_expired: u64,
    pub pool_failed: u64,
    pub pool_discarded: u64,
    pub pool_stale: u64,
    pub pool_hits: u64,
    pub pool_misses: u64,
    pub pool_hit_rate: f64,
    pub pool_wait: DurationSummary,

    pub active_conns: i64,
    pub peak_conns: i64,
    pub total_conns: u64,
    pub total_bytes: u64,
    pub conn_errors: u64,

    pub connect_time: DurationSummary,
    pub conn_lifetime: DurationSummary,
    pub pool_age: DurationSummary,
}

impl StatsSnapshot {
    /// Log a condensed single-line summary.
    pub fn log(&self, logger: &Logger) {
        let rate = if !self.uptime.is_zero() {
            let bps = self.total_bytes as f64 / self.uptime.as_secs_f64();
            if bps >= 1024.0 {
                format!("{}/s", format_bytes(bps as u64, false))
            } else {
                format!("{}B/s", bps as u64)
            }
        } else {
            String::new()
        };

        // Only show non-zero problem counters
        let mut parts: Vec<String> = Vec::with_capacity(3);
        if self.conn_errors > 0 {
            parts.push(format!("err={}", self.conn_errors));
        }
        if self.pool_stale > 0 {
            parts.push(format!("stale={}", self.pool_stale));
        }
        if self.pool_failed > 0 {
            parts.push(format!("fail={}", self.pool_failed));
        }
        let problems = if parts.is_empty() {
            String::new()
        } else {
            format!(" [{}]", parts.join(" "))
        };

        log_event!(
            logger,
            "[STATS] active={} peak={} total={} pool={}/{} hit={:.0}% rtt={} life={} age={} bytes={} ({}){}",
            self.active_conns,
            self.peak_conns,
            self.total_conns,
            self.pool_available,
            self.pool_size,
            self.pool_hit_rate,
            format_duration(self.connect_time.avg),
            format_duration(self.conn_lifetime.avg),
            format_duration(self.pool_age.avg),
            format_bytes(self.total_bytes, false),
            rate,
            problems,
        );
    }
}

fn timing_line(s: &DurationSummary) -> String {
    if s.count == 0 {
        return "n/a".to_string();
    }
    format!(
        "avg={} min={} max={}",
        format_duration(s.avg),
        format_duration(s.min),
        format_duration(s.max)
    )
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\n=== Tunnel Statistics ===\n\
             Uptime: {}\n\
             \n\
             Pool:\n\
             \x20 Size: {}, Available: {}\n\
             \x20 Created: {}, Reused: {} ({:.1}% hit rate)\n\
             \x20 Expired: {}, Failed: {}, Discarded: {}, Stale: {}\n\
             \x20 Avg wait: {}\n\
             \n\
             Connections:\n\
             \x20 Active: {}, Peak: {}, Total: {}\n\
             \x20 Errors: {}\n\
             \x20 Bytes transferred: {}\n\
             \n\
             Timing:\n\
             \x20 Connect RTT:   {}\n\
             \x20 Conn lifetime: {}\n\
             \x20 Pool age:      {}\n",
            format_duration(self.uptime),
            self.pool_size,
            self.pool_available,
            self.pool_created,
            self.pool_hits,
            self.pool_hit_rate,
            self.pool_expired,
            self.pool_failed,
            self.pool_discarded,
            self.pool_stale,
            format_duration(self.pool_wait.avg),
            self.active_conns,
            self.peak_conns,
            self.total_conns,
            self.conn_errors,
            format_bytes(self.total_bytes, false),
            timing_line(&self.connect_time),
            timing_line(&self.conn_lifetime),
            timing_line(&self.pool_age),
        )
    }
}

/// Format a duration at a human scale: "450ms", "1.5s", "2m5s", "1h3m".
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms < 1_000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", d.as_secs_f64())
    } else if ms < 3_600_000 {
        let s = d.as_secs();
        format!("{}m{}s", s / 60, s % 60)
    } else {
        let s = d.as_secs();
        format!("{}h{}m", s / 3600, (s % 3600) / 60)
    }
}

/// Format a byte count with binary units; `short` omits the space.
pub fn format_bytes(b: u64, short: bool) -> String {
    const UNIT: u64 = 1024;
    if b < UNIT {
        return if short {
            format!("{}B", b)
        } else {
            format!("{} B", b)
        };
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = b / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    let suffix = [b'K', b'M', b'G', b'T', b'P', b'E'][exp] as char;
    if short {
        format!("{:.1}{}B", b as f64 / div as f64, suffix)
    } else {
        format!("{:.1} {}B", b as f64 / div as f64, suffix)
    }
}
