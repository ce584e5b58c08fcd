//! The `Logger` capability and an in-memory implementation.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

use crate::level::LogLevel;

/// Structured context attached to a log entry.
pub type LogContext = serde_json::Map<String, serde_json::Value>;

/// Build a [`LogContext`] from a JSON value.
///
/// Objects become the context directly. Any other value is stored under
/// a single `value` key so nothing passed in is lost.
pub fn context(value: serde_json::Value) -> LogContext {
    match value {
        serde_json::Value::Object(map) => map,
        serde_json::Value::Null => LogContext::new(),
        other => {
            let mut map = LogContext::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

/// Leveled structured logger.
///
/// Implementations must be usable from any thread and should never fail:
/// a logger that cannot reach its destination is expected to degrade
/// (e.g. to stderr) rather than surface errors to the caller.
pub trait Logger: Send + Sync {
    /// Write one entry.
    fn log(&self, level: LogLevel, message: &str, context: LogContext);

    /// The request-log capability, when this logger can write completion entries.
    fn request_log_sink(&self) -> Option<&dyn RequestLogSink> {
        None
    }

    /// Runtime type name, used in diagnostics about mis-wired loggers.
    fn kind(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn debug(&self, message: &str, context: LogContext) {
        self.log(LogLevel::Debug, message, context)
    }

    fn info(&self, message: &str, context: LogContext) {
        self.log(LogLevel::Info, message, context)
    }

    fn notice(&self, message: &str, context: LogContext) {
        self.log(LogLevel::Notice, message, context)
    }

    fn warning(&self, message: &str, context: LogContext) {
        self.log(LogLevel::Warning, message, context)
    }

    fn error(&self, message: &str, context: LogContext) {
        self.log(LogLevel::Error, message, context)
    }

    fn critical(&self, message: &str, context: LogContext) {
        self.log(LogLevel::Critical, message, context)
    }

    fn alert(&self, message: &str, context: LogContext) {
        self.log(LogLevel::Alert, message, context)
    }

    fn emergency(&self, message: &str, context: LogContext) {
        self.log(LogLevel::Emergency, message, context)
    }
}

/// Details of a completed request, handed to a [`RequestLogSink`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RequestCompletion {
    /// Final HTTP status sent to the client
    pub status: u16,
    /// Wall-clock time the request started, as fractional unix seconds
    pub request_start_time: f64,
}

/// Capability of writing the single "request completed" entry.
pub trait RequestLogSink: Send + Sync {
    fn log_request(&self, completion: &RequestCompletion);
}

/// One entry captured by [`MemoryLogger`].
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub context: LogContext,
}

/// Logger that keeps entries in memory.
///
/// Useful for asserting on what an application logged. Completion entries
/// are only accepted when created with [`MemoryLogger::with_request_log`].
#[derive(Debug, Default)]
pub struct MemoryLogger {
    records: Mutex<Vec<LogRecord>>,
    completions: Mutex<Vec<RequestCompletion>>,
    accepts_requests: bool,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A memory logger that also acts as a [`RequestLogSink`].
    pub fn with_request_log() -> Self {
        Self {
            accepts_requests: true,
            ..Self::default()
        }
    }

    /// Snapshot of the entries logged so far.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Snapshot of the completion entries logged so far.
    pub fn completions(&self) -> Vec<RequestCompletion> {
        self.completions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether any entry at `level` has a message containing `needle`.
    pub fn has_record_that_contains(&self, level: LogLevel, needle: &str) -> bool {
        self.records()
            .iter()
            .any(|record| record.level == level && record.message.contains(needle))
    }

    pub fn has_error_that_contains(&self, needle: &str) -> bool {
        self.has_record_that_contains(LogLevel::Error, needle)
    }
}

impl Logger for MemoryLogger {
    fn log(&self, level: LogLevel, message: &str, context: LogContext) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(LogRecord {
                level,
                message: message.to_string(),
                context,
            });
    }

    fn request_log_sink(&self) -> Option<&dyn RequestLogSink> {
        if self.accepts_requests {
            Some(self)
        } else {
            None
        }
    }
}

impl RequestLogSink for MemoryLogger {
    fn log_request(&self, completion: &RequestCompletion) {
        self.completions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(*completion);
    }
}
