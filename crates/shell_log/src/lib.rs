//! Severity-filtered logging sink bridging to host tracing.
//!
//! The sink carries a minimum severity that callers can raise or lower at
//! runtime; records below the minimum are dropped, everything else is
//! forwarded to the `tracing` subscriber installed by the host.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn, Level};

#[derive(Debug, Error)]
pub enum LogError {
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_tracing(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            LogLevel::Trace => 0,
            LogLevel::Debug => 1,
            LogLevel::Info => 2,
            LogLevel::Warn => 3,
            LogLevel::Error => 4,
        }
    }

    fn from_u8(raw: u8) -> LogLevel {
        match raw {
            0 => LogLevel::Trace,
            1 => LogLevel::Debug,
            2 => LogLevel::Info,
            3 => LogLevel::Warn,
            _ => LogLevel::Error,
        }
    }
}

impl FromStr for LogLevel {
    type Err = LogError;

    fn from_str(level: &str) -> Result<Self, Self::Err> {
        match level.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(LogError::InvalidLevel(other.to_string())),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        write!(f, "{name}")
    }
}

/// Shared sink with a runtime-adjustable minimum severity.
#[derive(Debug)]
pub struct LogSink {
    min: AtomicU8,
}

impl LogSink {
    pub fn new(min: LogLevel) -> Self {
        Self {
            min: AtomicU8::new(min.as_u8()),
        }
    }

    pub fn min_level(&self) -> LogLevel {
        LogLevel::from_u8(self.min.load(Ordering::Relaxed))
    }

    pub fn set_min_level(&self, min: LogLevel) {
        self.min.store(min.as_u8(), Ordering::Relaxed);
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level()
    }

    pub fn emit(&self, level: LogLevel, message: &str, fields: Option<&Value>) {
        if !self.enabled(level) {
            return;
        }
        match level.as_tracing() {
            Level::TRACE => trace!(fields = ?fields, "{message}"),
            Level::DEBUG => debug!(fields = ?fields, "{message}"),
            Level::INFO => info!(fields = ?fields, "{message}"),
            Level::WARN => warn!(fields = ?fields, "{message}"),
            Level::ERROR => error!(fields = ?fields, "{message}"),
        }
    }

    pub fn info(&self, message: &str) {
        self.emit(LogLevel::Info, message, None);
    }

    pub fn error(&self, message: &str) {
        self.emit(LogLevel::Error, message, None);
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new(LogLevel::Warn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_levels() {
        assert_eq!("trace".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert_eq!("INFO".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("Error".parse::<LogLevel>().unwrap(), LogLevel::Error);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Info < LogLevel::Error);
    }

    #[test]
    fn test_sink_filtering() {
        let sink = LogSink::new(LogLevel::Warn);
        assert!(!sink.enabled(LogLevel::Info));
        assert!(sink.enabled(LogLevel::Warn));
        assert!(sink.enabled(LogLevel::Error));

        sink.set_min_level(LogLevel::Info);
        assert_eq!(sink.min_level(), LogLevel::Info);
        assert!(sink.enabled(LogLevel::Info));
        assert!(!sink.enabled(LogLevel::Debug));
    }

    #[test]
    fn test_display_round_trip() {
        for level in [
            LogLevel::Trace,
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warn,
            LogLevel::Error,
        ] {
            assert_eq!(level.to_string().parse::<LogLevel>().unwrap(), level);
        }
    }
}
