//! Collaborators supplied by the embedding application.

use microframework_logging::Logger;
use std::sync::Arc;

use crate::clock::HrTime;
use crate::factory::Factory;
use crate::output::OutputBuffer;
use crate::policy::ErrorPolicy;
use crate::request::ServerRequest;
use crate::response::Response;

/// Supplies the logger for one invocation and the matching request logger.
pub trait LoggerProvider: Send + Sync {
    /// Must not fail under normal operation: if it does, nothing about this
    /// invocation can be logged except the failure itself.
    fn get_logger(&self) -> anyhow::Result<Arc<dyn Logger>>;

    fn get_request_logger(&self) -> Box<dyn RequestLogger>;
}

/// Writes the single completion entry of an invocation.
pub trait RequestLogger: Send {
    /// Must never panic or write output; failures are reported through `logger`.
    fn log_request(&self, logger: &dyn Logger, start_mark: HrTime, status: u16);
}

/// Application code: turns a request into a response.
pub trait RequestHandler: Send {
    fn handle(&self, request: ServerRequest) -> anyhow::Result<Response>;
}

impl<F> RequestHandler for F
where
    F: Fn(ServerRequest) -> anyhow::Result<Response> + Send,
{
    fn handle(&self, request: ServerRequest) -> anyhow::Result<Response> {
        self(request)
    }
}

/// Immutable facts about one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionContext {
    pub start_mark: HrTime,
    pub default_timezone: String,
    pub default_locale: String,
}

/// What a handler factory receives.
#[derive(Clone)]
pub struct HandlerContext {
    pub logger: Arc<dyn Logger>,
    /// Where the handler's printed output goes
    pub output: OutputBuffer,
    /// For reporting diagnostics that may fail the request
    pub errors: ErrorPolicy,
    pub execution: ExecutionContext,
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("logger", &self.logger.kind())
            .field("output", &self.output)
            .field("errors", &self.errors)
            .field("execution", &self.execution)
            .finish()
    }
}

impl Factory {
    /// Factory for a logger provider built on demand.
    pub fn logger_provider<P, F>(make: F) -> Self
    where
        P: LoggerProvider + 'static,
        F: FnOnce() -> anyhow::Result<P> + Send + 'static,
    {
        Factory::typed(move |()| Ok(Arc::new(make()?) as Arc<dyn LoggerProvider>))
    }

    /// Factory for the inbound request.
    pub fn request<F>(make: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<ServerRequest> + Send + 'static,
    {
        Factory::typed(move |()| make())
    }
}

impl Factory<HandlerContext> {
    /// Factory for a handler, given the context of the invocation.
    pub fn handler<H, F>(make: F) -> Self
    where
        H: RequestHandler + 'static,
        F: FnOnce(HandlerContext) -> anyhow::Result<H> + Send + 'static,
    {
        Factory::typed(move |ctx: HandlerContext| Ok(Box::new(make(ctx)?) as Box<dyn RequestHandler>))
    }
}
