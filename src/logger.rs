use chrono::Local;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Log severities. Event sits just above None: operational telemetry (the
/// periodic stats line) keeps flowing even when Error and below are
/// filtered out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    None = 0,
    Event = 1,
    Error = 2,
    Warn = 3,
    Info = 4,
    Debug = 5,
}

impl LogLevel {
    /// Parse a level name from the `log` URL parameter; unknown names fall
    /// back to Info.
    pub fn parse(s: &str) -> Self {
        match s {
            "none" => LogLevel::None,
            "event" => LogLevel::Event,
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            _ => LogLevel::Info,
        }
    }

    fn label(self) -> &'static str {
        match self {
            LogLevel::None => "",
            LogLevel::Event => "EVENT",
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }

    fn color(self) -> &'static str {
        match self {
            LogLevel::None => "",
            LogLevel::Event => "\x1b[35m",
            LogLevel::Error => "\x1b[31m",
            LogLevel::Warn => "\x1b[33m",
            LogLevel::Info => "\x1b[32m",
            LogLevel::Debug => "\x1b[36m",
        }
    }
}

/// Leveled stderr logger shared across tasks. The level is adjustable at
/// runtime; clones share it.
#[derive(Clone)]
pub struct Logger {
    level: Arc<AtomicU8>,
    colored: bool,
}

impl Logger {
    pub fn new(level: LogLevel, colored: bool) -> Self {
        Self {
            level: Arc::new(AtomicU8::new(level as u8)),
            colored,
        }
    }

    pub fn set_level(&self, level: LogLevel) {
        self.level.store(level as u8, Ordering::Relaxed);
    }

    fn log(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        if level == LogLevel::None || (level as u8) > self.level.load(Ordering::Relaxed) {
            return;
        }

        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        if self.colored {
            eprintln!(
                "{}  {}{}\x1b[0m  {}",
                timestamp,
                level.color(),
                level.label(),
                args
            );
        } else {
            eprintln!("{}  {}  {}", timestamp, level.label(), args);
        }
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Debug, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Info, args);
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Warn, args);
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Error, args);
    }

    pub fn event(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Event, args);
    }
}

/// Formatted logging without building an intermediate String
#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $($arg:tt)*) => {
        $logger.debug(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($logger:expr, $($arg:tt)*) => {
        $logger.info(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $($arg:tt)*) => {
        $logger.warn(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($logger:expr, $($arg:tt)*) => {
        $logger.error(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_event {
    ($logger:expr, $($arg:tt)*) => {
        $logger.event(format_args!($($arg)*))
    };
}
