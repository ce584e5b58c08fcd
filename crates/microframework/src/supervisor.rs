//! The execution supervisor
//!
//! [`MicroFramework::execute`] runs exactly one request through one handler
//! and guarantees the caller ends up with either the handler's response or
//! the fixed fallback response, never both and never neither.
//!
//! ## State machine
//!
//! ```text
//! Init -> ErrorPolicyInstalled -> LoggerAcquired -> RequestAcquired -> HandlerInvoked
//!                                                                        |
//!                                          { Rendered | FailureCaught } <-+
//!                                                     |
//!                                                 Completed
//! ```
//!
//! Any failure after `ErrorPolicyInstalled` (returned error, reported
//! diagnostic, integrity violation or panic) moves to `FailureCaught`: it is
//! logged at emergency level and the fallback response is written. The
//! completion entry is written last, whatever happened, if and only if both
//! a logger provider and a logger were obtained.

use microframework_logging::{context, LogDestination, Logger, StackdriverLogger};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::backtrace::BacktraceStatus;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::capabilities::{ExecutionContext, HandlerContext, LoggerProvider, RequestHandler};
use crate::clock::{HrTime, SystemClock};
use crate::config::FrameworkConfig;
use crate::error::FrameworkError;
use crate::factory::Factory;
use crate::integrity::OutputIntegritySupervisor;
use crate::output::OutputBuffer;
use crate::policy::{panic_message, Diagnostic, ErrorPolicy, PanicRecord};
use crate::request::{CgiRequestSource, RequestSource, ServerRequest};
use crate::transport::Transport;

/// Where an invocation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Init,
    ErrorPolicyInstalled,
    LoggerAcquired,
    RequestAcquired,
    HandlerInvoked,
    Rendered,
    FailureCaught,
    Completed,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Init => "init",
            ExecutionState::ErrorPolicyInstalled => "error_policy_installed",
            ExecutionState::LoggerAcquired => "logger_acquired",
            ExecutionState::RequestAcquired => "request_acquired",
            ExecutionState::HandlerInvoked => "handler_invoked",
            ExecutionState::Rendered => "rendered",
            ExecutionState::FailureCaught => "failure_caught",
            ExecutionState::Completed => "completed",
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which of the two possible outcomes reached the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rendered {
    Response,
    Fallback,
}

/// Summary of one invocation, for embedding code and tests.
///
/// The transport remains the client-visible outcome; this only describes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub final_state: ExecutionState,
    pub rendered: Rendered,
    /// Status the transport reports after rendering
    pub status: u16,
    /// Label of the caught failure, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// State the invocation was in when the failure happened
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_in: Option<ExecutionState>,
    /// Whether the completion entry was handed to the request logger
    pub request_logged: bool,
}

/// Collaborators for one invocation, all constructed on demand.
pub struct Invocation {
    pub logger_provider_factory: Factory,
    pub handler_factory: Factory<HandlerContext>,
    /// Defaults to the supervisor's request source
    pub request_factory: Option<Factory>,
    /// Defaults to a mark taken when execution starts
    pub start_mark: Option<HrTime>,
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("request_factory", &self.request_factory.is_some())
            .field("start_mark", &self.start_mark)
            .finish_non_exhaustive()
    }
}

impl Invocation {
    pub fn new(logger_provider_factory: Factory, handler_factory: Factory<HandlerContext>) -> Self {
        Self {
            logger_provider_factory,
            handler_factory,
            request_factory: None,
            start_mark: None,
        }
    }

    pub fn with_request_factory(mut self, request_factory: Factory) -> Self {
        self.request_factory = Some(request_factory);
        self
    }

    /// Mark taken as early as possible by the entry point, for latency.
    pub fn with_start_mark(mut self, start_mark: HrTime) -> Self {
        self.start_mark = Some(start_mark);
        self
    }
}

/// A caught failure with everything needed to log it.
#[derive(Debug)]
struct Failure {
    error: FrameworkError,
    state: ExecutionState,
    file: Option<String>,
    line: Option<u32>,
    trace: String,
}

impl Failure {
    fn caught(error: FrameworkError, state: ExecutionState) -> Self {
        let mut failure = Failure {
            trace: trace_of(&error),
            error,
            state,
            file: None,
            line: None,
        };
        if let Some(location) = failure.diagnostic().map(|d| d.location) {
            failure.file = Some(location.file().to_string());
            failure.line = Some(location.line());
        }
        failure
    }

    fn panicked(payload: &(dyn std::any::Any + Send), record: Option<PanicRecord>, state: ExecutionState) -> Self {
        let message = record
            .as_ref()
            .map(|r| r.message.clone())
            .unwrap_or_else(|| panic_message(payload));
        let (file, line, trace) = match record {
            Some(r) => (Some(r.file), Some(r.line), r.backtrace.unwrap_or_default()),
            None => (None, None, String::new()),
        };
        Failure {
            error: FrameworkError::HandlerFailure(anyhow::anyhow!("{message}")),
            state,
            file,
            line,
            trace,
        }
    }

    fn diagnostic(&self) -> Option<&Diagnostic> {
        match &self.error {
            FrameworkError::HandlerFailure(cause) | FrameworkError::FactoryFailed { cause, .. } => {
                cause.downcast_ref::<Diagnostic>()
            }
            _ => None,
        }
    }

    fn log_message(&self) -> String {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => format!(
                "Uncaught {}: {} at {}:{}",
                self.error.kind(),
                self.error,
                file,
                line
            ),
            _ => format!(
                "Uncaught {}: {} during {}",
                self.error.kind(),
                self.error,
                self.state
            ),
        }
    }

    fn exception_context(&self) -> serde_json::Value {
        json!({
            "class": self.error.kind(),
            "msg": self.error.to_string(),
            "code": 0,
            "file": self.file.clone().unwrap_or_default(),
            "line": self.line.unwrap_or_default(),
            "trace": self.trace,
            "state": self.state.as_str(),
        })
    }
}

fn trace_of(error: &FrameworkError) -> String {
    let backtrace = match error {
        FrameworkError::HandlerFailure(cause) | FrameworkError::FactoryFailed { cause, .. } => {
            Some(cause.backtrace())
        }
        _ => None,
    };
    if let Some(bt) = backtrace.filter(|bt| bt.status() == BacktraceStatus::Captured) {
        return bt.to_string();
    }

    error
        .causes()
        .iter()
        .enumerate()
        .map(|(i, cause)| format!("#{i} {cause}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// What the current invocation has acquired so far.
struct Run {
    state: ExecutionState,
    provider: Option<Arc<dyn LoggerProvider>>,
    logger: Option<Arc<dyn Logger>>,
}

impl Run {
    fn advance(&mut self, next: ExecutionState) {
        tracing::debug!(from = %self.state, to = %next, "Execution state");
        self.state = next;
    }
}

/// Supervises single-request invocations.
pub struct MicroFramework {
    config: FrameworkConfig,
    integrity: OutputIntegritySupervisor,
    error_policy: ErrorPolicy,
    request_source: Arc<dyn RequestSource>,
    fallback_logger: Option<Arc<dyn Logger>>,
}

impl fmt::Debug for MicroFramework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MicroFramework")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for MicroFramework {
    fn default() -> Self {
        Self::new(FrameworkConfig::default())
    }
}

impl MicroFramework {
    pub fn new(config: FrameworkConfig) -> Self {
        Self {
            integrity: OutputIntegritySupervisor::new(config.default_content_type_header()),
            error_policy: ErrorPolicy::new(config.error_reporting),
            request_source: Arc::new(CgiRequestSource::new()),
            fallback_logger: None,
            config,
        }
    }

    /// Where requests come from when an invocation has no request factory.
    pub fn with_request_source(mut self, source: impl RequestSource + 'static) -> Self {
        self.request_source = Arc::new(source);
        self
    }

    /// Logger for failures that happen before any logger was acquired.
    ///
    /// Defaults to a metadata-less JSON logger on stderr.
    pub fn with_fallback_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.fallback_logger = Some(logger);
        self
    }

    pub fn config(&self) -> &FrameworkConfig {
        &self.config
    }

    /// Run one request to completion.
    ///
    /// Never fails and never panics on account of the application: every
    /// outcome is expressed on `transport` and summarised in the report.
    pub fn execute(&self, invocation: Invocation, transport: &mut dyn Transport) -> ExecutionReport {
        let start_mark = invocation.start_mark.unwrap_or_else(SystemClock::mark);
        let execution = ExecutionContext {
            start_mark,
            default_timezone: self.config.default_timezone.clone(),
            default_locale: self.config.default_locale.clone(),
        };

        // Bottom capture frame; released by the integrity check or on failure.
        let output = OutputBuffer::new();
        let _capture = output.begin_capture();

        let mut run = Run {
            state: ExecutionState::Init,
            provider: None,
            logger: None,
        };
        let supervised = self.error_policy.supervise();
        run.advance(ExecutionState::ErrorPolicyInstalled);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.run_pipeline(&mut run, invocation, &execution, &output, transport)
        }));
        let result = match outcome {
            Ok(result) => result.map_err(|error| Failure::caught(error, run.state)),
            Err(payload) => Err(Failure::panicked(&*payload, supervised.take_panic(), run.state)),
        };

        let (rendered, failure) = match result {
            Ok(()) => {
                run.advance(ExecutionState::Rendered);
                (Rendered::Response, None)
            }
            Err(failure) => {
                run.advance(ExecutionState::FailureCaught);
                // Whatever the application printed is dropped, not sent.
                output.unwind();
                self.log_uncaught(run.logger.as_deref(), &failure);
                self.integrity.render_error_response(transport);
                (Rendered::Fallback, Some(failure))
            }
        };

        let status = transport.status();
        let request_logged = self.log_request(&run, start_mark, status);
        drop(supervised);
        run.advance(ExecutionState::Completed);

        tracing::info!(
            status,
            rendered = ?rendered,
            failure = failure.as_ref().map(|f| f.error.as_label()),
            request_logged,
            "Invocation completed"
        );

        ExecutionReport {
            final_state: run.state,
            rendered,
            status,
            failure: failure.as_ref().map(|f| f.error.as_label().to_string()),
            failed_in: failure.as_ref().map(|f| f.state),
            request_logged,
        }
    }

    fn run_pipeline(
        &self,
        run: &mut Run,
        invocation: Invocation,
        execution: &ExecutionContext,
        output: &OutputBuffer,
        transport: &mut dyn Transport,
    ) -> Result<(), FrameworkError> {
        let provider: Arc<dyn LoggerProvider> = invocation.logger_provider_factory.call(())?;
        run.provider = Some(Arc::clone(&provider));
        let logger = provider
            .get_logger()
            .map_err(FrameworkError::HandlerFailure)?;
        run.logger = Some(Arc::clone(&logger));
        run.advance(ExecutionState::LoggerAcquired);

        let request = match invocation.request_factory {
            Some(factory) => factory.call::<ServerRequest>(())?,
            None => self.request_source.read_request()?,
        };
        run.advance(ExecutionState::RequestAcquired);

        let handler: Box<dyn RequestHandler> = invocation.handler_factory.call(HandlerContext {
            logger,
            output: output.clone(),
            errors: self.error_policy,
            execution: execution.clone(),
        })?;
        let response = handler
            .handle(request)
            .map_err(FrameworkError::HandlerFailure)?;
        run.advance(ExecutionState::HandlerInvoked);

        self.integrity
            .reset_buffers_asserting_no_output(output, transport)?;
        self.integrity.render_response(&response, transport)
    }

    fn log_uncaught(&self, logger: Option<&dyn Logger>, failure: &Failure) {
        let message = failure.log_message();
        let entry = context(json!({ "exception": failure.exception_context() }));

        let logged = panic::catch_unwind(AssertUnwindSafe(|| match logger {
            Some(logger) => logger.emergency(&message, entry),
            None => self.fallback_logger().emergency(&message, entry),
        }));
        if logged.is_err() {
            tracing::error!(failure = %message, "Logger panicked while logging an uncaught failure");
        }
    }

    fn fallback_logger(&self) -> Arc<dyn Logger> {
        match &self.fallback_logger {
            Some(logger) => Arc::clone(logger),
            None => Arc::new(StackdriverLogger::without_metadata(&LogDestination::Stderr)),
        }
    }

    /// Finalizer: hand the completion to the request logger, swallowing any failure.
    fn log_request(&self, run: &Run, start_mark: HrTime, status: u16) -> bool {
        let (Some(provider), Some(logger)) = (&run.provider, &run.logger) else {
            return false;
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            provider
                .get_request_logger()
                .log_request(logger.as_ref(), start_mark, status)
        }));
        match outcome {
            Ok(()) => true,
            Err(payload) => {
                let error = FrameworkError::RequestLoggingFailure(panic_message(&*payload));
                tracing::warn!(error = %error, "Swallowed request logging failure");
                false
            }
        }
    }
}
