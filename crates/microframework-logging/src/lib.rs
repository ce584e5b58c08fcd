//! Structured logging for the microframework request supervisor.
//!
//! Provides the [`Logger`] capability used by applications, the optional
//! [`RequestLogSink`] capability for the single per-request completion
//! entry, and a [`StackdriverLogger`] that writes both as JSON lines.
//!
//! ```
//! use microframework_logging::{
//!     LogDestination, Logger, RequestMetadata, ServiceContext, SharedBuffer, StackdriverLogger,
//! };
//! use std::sync::Arc;
//!
//! let buffer = SharedBuffer::new();
//! let logger = Arc::new(StackdriverLogger::new(
//!     &LogDestination::Memory(buffer.clone()),
//!     ServiceContext::new("my-service", "1.0.0"),
//! ));
//! let scoped = logger.bind(RequestMetadata::detached());
//! scoped.info("Hello", Default::default());
//! assert_eq!(buffer.entries()[0]["severity"], "INFO");
//! ```

pub mod cell;
pub mod level;
pub mod logger;
pub mod metadata;
pub mod stackdriver;

pub use cell::LoggerCell;
pub use level::{LogLevel, ParseLevelError};
pub use logger::{
    context, LogContext, LogRecord, Logger, MemoryLogger, RequestCompletion, RequestLogSink,
};
pub use metadata::{RequestMetadata, ServiceContext, UNKNOWN_VERSION};
pub use stackdriver::{
    LogDestination, ScopedLogger, SharedBuffer, StackdriverLogger, REPORTED_ERROR_EVENT_TYPE,
    TRACE_KEY,
};
