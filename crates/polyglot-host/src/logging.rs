//! Guest logging.
//!
//! Runtimes emit logs through the `log` bridge function. Entries are both:
//! 1. Stored in a [`LogBuffer`] for later retrieval
//! 2. Emitted via the `tracing` crate, tagged `guest_log = true`

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use polyglot_common::{PolyglotError, Result, Value};

/// Log level for guest logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

impl FromStr for LogLevel {
    type Err = PolyglotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(PolyglotError::invalid_argument(format!(
                "unknown log level: {other}"
            ))),
        }
    }
}

/// Convert a numeric log level (0=debug, 1=info, 2=warn, 3=error).
///
/// Unknown values default to Info.
pub fn level_from_i64(level: i64) -> LogLevel {
    match level {
        0 => LogLevel::Debug,
        2 => LogLevel::Warn,
        3 => LogLevel::Error,
        _ => LogLevel::Info,
    }
}

/// Convert a [`LogLevel`] to its numeric value.
pub fn level_to_i64(level: LogLevel) -> i64 {
    match level {
        LogLevel::Debug => 0,
        LogLevel::Info => 1,
        LogLevel::Warn => 2,
        LogLevel::Error => 3,
    }
}

/// Read a level passed across the bridge, either numeric or textual.
pub fn level_from_value(value: &Value) -> Result<LogLevel> {
    match value {
        Value::Int(n) => Ok(level_from_i64(*n)),
        Value::String(s) => s.parse(),
        other => Err(PolyglotError::invalid_argument(format!(
            "log: level must be an integer or a string, got {}",
            other.type_name()
        ))),
    }
}

/// A single log entry from guest code.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: Instant,
}

/// Bounded in-memory store of guest logs.
///
/// When full, the oldest entries are discarded.
#[derive(Debug)]
pub struct LogBuffer {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl LogBuffer {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Record a guest log and re-emit it through `tracing`.
    pub fn log(&self, level: LogLevel, message: &str) {
        {
            let mut entries = self.entries.lock();
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(LogEntry {
                level,
                message: message.to_string(),
                timestamp: Instant::now(),
            });
        }

        match level {
            LogLevel::Debug => debug!(guest_log = true, "{}", message),
            LogLevel::Info => info!(guest_log = true, "{}", message),
            LogLevel::Warn => warn!(guest_log = true, "{}", message),
            LogLevel::Error => error!(guest_log = true, "{}", message),
        }
    }

    /// Copy of the stored entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Remove and return the stored entries.
    pub fn drain(&self) -> Vec<LogEntry> {
        self.entries.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_stores_entries() {
        let logs = LogBuffer::new();

        logs.log(LogLevel::Info, "Hello");
        logs.log(LogLevel::Error, "World");

        let entries = logs.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "Hello");
        assert_eq!(entries[0].level, LogLevel::Info);
        assert_eq!(entries[1].level, LogLevel::Error);
    }

    #[test]
    fn test_buffer_drops_oldest_when_full() {
        let logs = LogBuffer::with_capacity(2);
        logs.log(LogLevel::Debug, "a");
        logs.log(LogLevel::Debug, "b");
        logs.log(LogLevel::Debug, "c");

        let messages: Vec<_> = logs.drain().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["b", "c"]);
        assert!(logs.is_empty());
    }

    #[test]
    fn test_buffer_keeps_newest_over_many_wraps() {
        let logs = LogBuffer::with_capacity(3);
        for n in 0..1000 {
            logs.log(LogLevel::Debug, &n.to_string());
        }

        assert_eq!(logs.len(), 3);
        let messages: Vec<_> = logs.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["997", "998", "999"]);
    }

    #[test]
    fn test_level_conversions() {
        assert_eq!(level_from_i64(0), LogLevel::Debug);
        assert_eq!(level_from_i64(3), LogLevel::Error);
        assert_eq!(level_from_i64(99), LogLevel::Info);
        assert_eq!(level_to_i64(LogLevel::Warn), 2);

        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_level_from_value() {
        assert_eq!(level_from_value(&Value::Int(2)).unwrap(), LogLevel::Warn);
        assert_eq!(
            level_from_value(&Value::from("error")).unwrap(),
            LogLevel::Error
        );

        let err = level_from_value(&Value::Bool(true)).unwrap_err();
        assert!(matches!(err, PolyglotError::InvalidArgument { .. }));
    }
}
