//! Error types for the request supervisor
//!
//! Every failure the supervisor can observe is one of these variants. None of
//! them is ever shown to the client: they are logged, then degraded to the
//! fixed fallback response.

use std::io;
use thiserror::Error;

/// Failure raised while supervising one invocation
#[derive(Error, Debug)]
pub enum FrameworkError {
    /// A factory produced a value of the wrong type
    #[error("Factory for {expected} incorrectly returned {actual}")]
    FactoryTypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// A factory failed before producing anything
    #[error("Factory for {expected} failed: {cause}")]
    FactoryFailed {
        expected: &'static str,
        cause: anyhow::Error,
    },

    /// Stray output, unbalanced capture scopes or headers committed too early
    #[error("{0}")]
    OutputIntegrityViolation(String),

    /// The response cannot be expressed as an unambiguous header block
    #[error("{0}")]
    HeaderRenderingViolation(String),

    /// The application failed (returned error, reported diagnostic or panic)
    #[error("{0}")]
    HandlerFailure(anyhow::Error),

    /// The inbound request could not be read
    #[error("Request unavailable: {0}")]
    RequestUnavailable(String),

    /// The transport refused bytes
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    /// The completion entry could not be written
    #[error("Request logging failed: {0}")]
    RequestLoggingFailure(String),
}

impl FrameworkError {
    pub fn output_integrity(msg: impl Into<String>) -> Self {
        FrameworkError::OutputIntegrityViolation(msg.into())
    }

    pub fn header_rendering(msg: impl Into<String>) -> Self {
        FrameworkError::HeaderRenderingViolation(msg.into())
    }

    /// Stable snake_case label, used in reports and tracing fields
    pub fn as_label(&self) -> &'static str {
        match self {
            FrameworkError::FactoryTypeMismatch { .. } => "factory_type_mismatch",
            FrameworkError::FactoryFailed { .. } => "factory_failed",
            FrameworkError::OutputIntegrityViolation(_) => "output_integrity_violation",
            FrameworkError::HeaderRenderingViolation(_) => "header_rendering_violation",
            FrameworkError::HandlerFailure(_) => "handler_failure",
            FrameworkError::RequestUnavailable(_) => "request_unavailable",
            FrameworkError::Transport(_) => "transport",
            FrameworkError::RequestLoggingFailure(_) => "request_logging_failure",
        }
    }

    /// Failure class name, as shown in the uncaught-failure log entry
    pub fn kind(&self) -> &'static str {
        match self {
            FrameworkError::FactoryTypeMismatch { .. } => "FactoryTypeMismatch",
            FrameworkError::FactoryFailed { .. } => "FactoryFailed",
            FrameworkError::OutputIntegrityViolation(_) => "OutputIntegrityViolation",
            FrameworkError::HeaderRenderingViolation(_) => "HeaderRenderingViolation",
            FrameworkError::HandlerFailure(_) => "HandlerFailure",
            FrameworkError::RequestUnavailable(_) => "RequestUnavailable",
            FrameworkError::Transport(_) => "TransportError",
            FrameworkError::RequestLoggingFailure(_) => "RequestLoggingFailure",
        }
    }

    /// Causes below this error, outermost first
    pub fn causes(&self) -> Vec<String> {
        let inner = match self {
            FrameworkError::FactoryFailed { cause, .. } => cause,
            FrameworkError::HandlerFailure(cause) => cause,
            _ => return Vec::new(),
        };
        inner.chain().skip(1).map(ToString::to_string).collect()
    }
}

/// Result type alias for supervisor operations
pub type Result<T> = std::result::Result<T, FrameworkError>;
