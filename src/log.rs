use std::sync::atomic::{AtomicU8, Ordering};

/// Environment variable that overrides `--log-level` when set.
pub const LOG_LEVEL_ENV: &str = "MIGRATE_GOLEM_LOG";

/// Log levels for scheduler output, ordered by verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Error => write!(f, "error"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Debug => write!(f, "debug"),
        }
    }
}

static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

pub fn set_log_level(level: LogLevel) {
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn current_log_level() -> LogLevel {
    match LOG_LEVEL.load(Ordering::Relaxed) {
        0 => LogLevel::Error,
        1 => LogLevel::Warn,
        2 => LogLevel::Info,
        _ => LogLevel::Debug,
    }
}

/// Parse a log level string. Returns `Err` with a message for invalid input.
pub fn parse_log_level(s: &str) -> Result<LogLevel, String> {
    match s.trim().to_lowercase().as_str() {
        "error" => Ok(LogLevel::Error),
        "warn" | "warning" => Ok(LogLevel::Warn),
        "info" => Ok(LogLevel::Info),
        "debug" => Ok(LogLevel::Debug),
        _ => Err(format!(
            "Invalid log level '{}': expected error, warn, info, or debug",
            s
        )),
    }
}

/// Resolve the effective level: a non-empty `MIGRATE_GOLEM_LOG` wins over the CLI flag.
pub fn resolve_log_level(cli_value: &str, env_value: Option<&str>) -> Result<LogLevel, String> {
    match env_value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => parse_log_level(v).map_err(|e| format!("{} (from {})", e, LOG_LEVEL_ENV)),
        None => parse_log_level(cli_value),
    }
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        eprintln!($($arg)*)
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if $crate::log::current_log_level() >= $crate::log::LogLevel::Warn {
            eprintln!($($arg)*)
        }
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if $crate::log::current_log_level() >= $crate::log::LogLevel::Info {
            eprintln!($($arg)*)
        }
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if $crate::log::current_log_level() >= $crate::log::LogLevel::Debug {
            eprintln!($($arg)*)
        }
    };
}
