//! Stackdriver-shaped JSON logger
//!
//! Writes one JSON document per line, in the shape understood by Google
//! Cloud Logging and Error Reporting. A single [`StackdriverLogger`] owns
//! the destination and the service metadata for the whole process; each
//! request logs through a [`ScopedLogger`] that adds its own correlation id
//! and HTTP context.
//!
//! ## Entry shapes
//!
//! ```text
//! app:  {severity, message, @ingenType: "app", serviceContext, timestamp,
//!        context: {req, httpRequest, ...}, logging.googleapis.com/trace,
//!        [exception, @type, stack_trace]}
//! rqst: {severity, @ingenType: "rqst", serviceContext, timestamp,
//!        httpRequest: {requestMethod, requestUrl, remoteIp, status, userAgent, latency},
//!        context: {req}, logging.googleapis.com/trace}
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use std::fmt;
use std::io::{self, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use crate::level::LogLevel;
use crate::logger::{LogContext, Logger, RequestCompletion, RequestLogSink};
use crate::metadata::{RequestMetadata, ServiceContext};

/// `@type` marking an entry for Cloud Error Reporting.
pub const REPORTED_ERROR_EVENT_TYPE: &str =
    "type.googleapis.com/google.devtools.clouderrorreporting.v1beta1.ReportedErrorEvent";

/// Key holding the trace id in every entry.
pub const TRACE_KEY: &str = "logging.googleapis.com/trace";

/// Where log lines are written.
#[derive(Debug, Clone)]
pub enum LogDestination {
    Stdout,
    Stderr,
    /// Append to a file, falling back to stderr if it cannot be opened
    File(PathBuf),
    /// Shared in-memory buffer
    Memory(SharedBuffer),
}

impl LogDestination {
    fn open(&self) -> Box<dyn Write + Send> {
        match self {
            LogDestination::Stdout => Box::new(io::stdout()),
            LogDestination::Stderr => Box::new(io::stderr()),
            LogDestination::File(path) => {
                match std::fs::OpenOptions::new().create(true).append(true).open(path) {
                    Ok(file) => Box::new(file),
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Could not open log file, logging to stderr"
                        );
                        Box::new(io::stderr())
                    }
                }
            }
            LogDestination::Memory(buffer) => Box::new(buffer.clone()),
        }
    }
}

impl Default for LogDestination {
    fn default() -> Self {
        LogDestination::Stdout
    }
}

impl FromStr for LogDestination {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "" | "stdout" | "-" => LogDestination::Stdout,
            "stderr" => LogDestination::Stderr,
            path => LogDestination::File(PathBuf::from(path)),
        })
    }
}

/// Cloneable in-memory sink; every clone appends to the same bytes.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap_or_else(PoisonError::into_inner)).into_owned()
    }

    /// Non-empty lines written so far.
    pub fn lines(&self) -> Vec<String> {
        self.contents()
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Lines decoded as JSON; lines that are not JSON are skipped.
    pub fn entries(&self) -> Vec<Value> {
        self.lines()
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Process-wide JSON logger.
pub struct StackdriverLogger {
    writer: Mutex<Box<dyn Write + Send>>,
    service: Option<ServiceContext>,
}

impl fmt::Debug for StackdriverLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackdriverLogger")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl StackdriverLogger {
    pub fn new(destination: &LogDestination, service: ServiceContext) -> Self {
        Self {
            writer: Mutex::new(destination.open()),
            service: Some(service),
        }
    }

    /// A logger with no service metadata.
    ///
    /// Always constructible, so it can stand in when the configured logger
    /// could not be built.
    pub fn without_metadata(destination: &LogDestination) -> Self {
        Self {
            writer: Mutex::new(destination.open()),
            service: None,
        }
    }

    pub fn service(&self) -> Option<&ServiceContext> {
        self.service.as_ref()
    }

    /// A view of this logger bound to one request.
    pub fn bind(self: &Arc<Self>, metadata: RequestMetadata) -> ScopedLogger {
        ScopedLogger {
            shared: Arc::clone(self),
            metadata,
        }
    }

    fn app_entry(
        &self,
        level: LogLevel,
        message: &str,
        mut context: LogContext,
        request: Option<&RequestMetadata>,
    ) -> Value {
        let mut entry = Map::new();
        entry.insert("severity".to_string(), level.severity().into());
        entry.insert("message".to_string(), message.into());
        entry.insert("@ingenType".to_string(), "app".into());
        entry.insert("timestamp".to_string(), format_timestamp(Utc::now()).into());
        self.insert_service(&mut entry);

        let exception = context.remove("exception");
        if let Some(request) = request {
            context.insert("req".to_string(), request.request_id.clone().into());
            let http = request.http_context();
            if !http.is_empty() {
                context.insert("httpRequest".to_string(), Value::Object(http));
            }
            entry.insert(TRACE_KEY.to_string(), request.trace.clone().into());
        }
        entry.insert("context".to_string(), Value::Object(context));

        if let Some(exception) = exception {
            if level.is_error() {
                entry.insert("@type".to_string(), REPORTED_ERROR_EVENT_TYPE.into());
                entry.insert("stack_trace".to_string(), stack_trace_text(&exception).into());
            }
            entry.insert("exception".to_string(), exception);
        }

        Value::Object(entry)
    }

    fn request_entry(&self, completion: &RequestCompletion, request: &RequestMetadata) -> Value {
        let level = match completion.status {
            500.. => LogLevel::Error,
            400..=499 => LogLevel::Warning,
            _ => LogLevel::Info,
        };
        let latency = (unix_now() - completion.request_start_time).max(0.0);

        let mut http = Map::new();
        if let Some(method) = &request.method {
            http.insert("requestMethod".to_string(), method.clone().into());
        }
        if let Some(url) = &request.url {
            http.insert("requestUrl".to_string(), url.clone().into());
        }
        if let Some(ip) = &request.remote_ip {
            http.insert("remoteIp".to_string(), ip.clone().into());
        }
        http.insert("status".to_string(), completion.status.into());
        if let Some(agent) = &request.user_agent {
            http.insert("userAgent".to_string(), agent.clone().into());
        }
        http.insert("latency".to_string(), format!("{latency:.6}s").into());

        let mut entry = Map::new();
        entry.insert("severity".to_string(), level.severity().into());
        entry.insert("@ingenType".to_string(), "rqst".into());
        if let Some(started) = timestamp_from_unix(completion.request_start_time) {
            entry.insert("timestamp".to_string(), format_timestamp(started).into());
        }
        entry.insert("httpRequest".to_string(), Value::Object(http));
        entry.insert(
            "context".to_string(),
            json!({ "req": request.request_id.clone() }),
        );
        self.insert_service(&mut entry);
        entry.insert(TRACE_KEY.to_string(), request.trace.clone().into());

        Value::Object(entry)
    }

    fn insert_service(&self, entry: &mut Map<String, Value>) {
        if let Some(service) = &self.service {
            entry.insert(
                "serviceContext".to_string(),
                json!({ "service": service.service, "version": service.version }),
            );
        }
    }

    fn write_entry(&self, entry: &Value) {
        let line = match serde_json::to_string(entry) {
            Ok(line) => line,
            Err(e) => {
                tracing::debug!(error = %e, "Could not encode log entry");
                return;
            }
        };

        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(writer, "{line}").and_then(|_| writer.flush()) {
            tracing::debug!(error = %e, "Could not write log entry");
        }
    }
}

impl Logger for StackdriverLogger {
    fn log(&self, level: LogLevel, message: &str, context: LogContext) {
        let entry = self.app_entry(level, message, context, None);
        self.write_entry(&entry);
    }
}

/// A [`StackdriverLogger`] bound to the metadata of one request.
#[derive(Debug, Clone)]
pub struct ScopedLogger {
    shared: Arc<StackdriverLogger>,
    metadata: RequestMetadata,
}

impl ScopedLogger {
    pub fn shared(&self) -> &Arc<StackdriverLogger> {
        &self.shared
    }

    pub fn metadata(&self) -> &RequestMetadata {
        &self.metadata
    }
}

impl Logger for ScopedLogger {
    fn log(&self, level: LogLevel, message: &str, context: LogContext) {
        let entry = self
            .shared
            .app_entry(level, message, context, Some(&self.metadata));
        self.shared.write_entry(&entry);
    }

    fn request_log_sink(&self) -> Option<&dyn RequestLogSink> {
        Some(self)
    }
}

impl RequestLogSink for ScopedLogger {
    fn log_request(&self, completion: &RequestCompletion) {
        let entry = self.shared.request_entry(completion, &self.metadata);
        self.shared.write_entry(&entry);
    }
}

/// Plain-text rendering of an `exception` context value.
fn stack_trace_text(exception: &Value) -> String {
    let field = |name: &str| {
        exception
            .get(name)
            .map(|value| match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default()
    };

    let mut text = format!(
        "{}: {} in {}:{}",
        field("class"),
        field("msg"),
        field("file"),
        field("line")
    );
    let trace = field("trace");
    if !trace.is_empty() {
        text.push_str("\nStack trace:\n");
        text.push_str(&trace);
    }
    text
}

fn unix_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

fn timestamp_from_unix(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = (((seconds - whole) * 1_000_000_000.0).round() as u32).min(999_999_999);
    DateTime::from_timestamp(whole as i64, nanos)
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}
