use std::env;
use std::time::Duration;

pub fn get_env_as_int(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

pub fn get_env_as_duration(name: &str, default: Duration) -> Duration {
    env::var(name)
        .ok()
        .and_then(|v| parse_duration(&v))
        .unwrap_or(default)
}

/// Parse Go-style duration strings like "5s", "100ms", "5m", "1h30m"
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total = Duration::ZERO;
    let mut remaining = s;

    while !remaining.is_empty() {
        // Numeric part
        let num_end = remaining
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(remaining.len());
        if num_end == 0 {
            return None;
        }
        let num: f64 = remaining[..num_end].parse().ok()?;
        remaining = &remaining[num_end..];

        // Unit part
        let unit_end = remaining
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(remaining.len());
        let unit = &remaining[..unit_end];
        remaining = &remaining[unit_end..];

        let dur = match unit {
            "ns" => Duration::from_nanos(num as u64),
            "us" | "µs" => Duration::from_micros(num as u64),
            "ms" => Duration::from_millis(num as u64),
            "s" => Duration::from_secs_f64(num),
            "m" => Duration::from_secs_f64(num * 60.0),
            "h" => Duration::from_secs_f64(num * 3600.0),
            _ => return None,
        };
        total += dur;
    }

    Some(total)
}

lazy_static_config! {
    pub DIAL_TIMEOUT: Duration = get_env_as_duration("ST_DIAL_TIMEOUT", Duration::from_secs(30));
    pub GET_TIMEOUT: Duration = get_env_as_duration("ST_GET_TIMEOUT", Duration::from_secs(30));
    pub VERIFY_TIMEOUT: Duration = get_env_as_duration("ST_VERIFY_TIMEOUT", Duration::from_secs(5));
    pub IDLE_TIMEOUT: Duration = get_env_as_duration("ST_IDLE_TIMEOUT", Duration::from_secs(300));
    pub WRITE_TIMEOUT: Duration = get_env_as_duration("ST_WRITE_TIMEOUT", Duration::from_secs(30));
    pub INITIAL_READ_TIMEOUT: Duration = get_env_as_duration("ST_INITIAL_READ_TIMEOUT", Duration::from_secs(10));
    pub POOL_STOP_GRACE: Duration = get_env_as_duration("ST_POOL_STOP_GRACE", Duration::from_secs(5));
    pub COPY_BUF_SIZE: usize = get_env_as_int("ST_COPY_BUF_SIZE", 32 * 1024);
    pub MAX_RETRIES: usize = get_env_as_int("ST_MAX_RETRIES", 3);
}

pub const DEFAULT_POOL_SIZE: usize = 4;
pub const DEFAULT_TTL: Duration = Duration::from_secs(10);
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::ZERO;

#[macro_export]
macro_rules! lazy_static_config {
    ($($vis:vis $name:ident : $ty:ty = $init:expr;)*) => {
        $(
            #[allow(non_snake_case)]
            $vis fn $name() -> $ty {
                use std::sync::OnceLock;
                static VALUE: OnceLock<$ty> = OnceLock::new();
                *VALUE.get_or_init(|| $init)
            }
        )*
    };
}
pub(crate) use lazy_static_config;
