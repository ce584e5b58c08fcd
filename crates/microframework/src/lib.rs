//! Single-request execution supervisor
//!
//! Runs one inbound request through one application handler and guarantees
//! that the client receives either the handler's response or a fixed opaque
//! failure response, and that the invocation is logged as one completion
//! entry plus, when something went wrong, one uncaught-failure entry sharing
//! its correlation id.
//!
//! ## Architecture
//!
//! - [`factory`]: deferred constructors with a checked result type
//! - [`supervisor`]: the [`MicroFramework`] state machine
//! - [`integrity`]: output and header checks around rendering
//! - [`request_logger`]: completion logging and latency
//! - [`capabilities`]: the traits an application implements
//! - [`output`] / [`transport`]: explicit output capture and response sinks
//! - [`server`]: an axum adapter for running the supervisor over HTTP
//! - [`cgi`]: running one invocation as a CGI script
//!
//! ## Usage
//!
//! ```
//! use microframework::{
//!     DefaultStackdriverLoggerProvider, Factory, Invocation, MemoryTransport, MicroFramework,
//!     Response, ServerEnv, ServerRequest, Transport,
//! };
//! use microframework_logging::{LogDestination, LoggerCell, SharedBuffer};
//!
//! let logs = SharedBuffer::new();
//! let invocation = Invocation::new(
//!     Factory::logger_provider(move || {
//!         Ok(DefaultStackdriverLoggerProvider::new("my-service", "/app/version")
//!             .with_destination(LogDestination::Memory(logs))
//!             .with_cell(LoggerCell::new())
//!             .with_server_env(ServerEnv::new()))
//!     }),
//!     Factory::handler(|_ctx| {
//!         Ok(|_request: ServerRequest| -> anyhow::Result<Response> { Ok(Response::ok("Hello")) })
//!     }),
//! )
//! .with_request_factory(Factory::request(|| {
//!     Ok(ServerRequest::from_env(ServerEnv::new(), Default::default())?)
//! }));
//!
//! let mut transport = MemoryTransport::new();
//! MicroFramework::default().execute(invocation, &mut transport);
//! assert_eq!(transport.status(), 200);
//! assert_eq!(transport.body_text(), "Hello");
//! ```

pub mod capabilities;
pub mod cgi;
pub mod clock;
pub mod config;
pub mod error;
pub mod factory;
pub mod integrity;
pub mod output;
pub mod policy;
pub mod provider;
pub mod request;
pub mod request_logger;
pub mod response;
pub mod server;
pub mod supervisor;
pub mod transport;

pub use capabilities::{
    ExecutionContext, HandlerContext, LoggerProvider, RequestHandler, RequestLogger,
};
pub use clock::{Clock, FixedClock, HrTime, SystemClock};
pub use config::{FrameworkConfig, FrameworkConfigBuilder};
pub use error::{FrameworkError, Result};
pub use factory::{Factory, Provided};
pub use integrity::{OutputIntegritySupervisor, FALLBACK_BODY};
pub use output::{CaptureScope, OutputBuffer};
pub use policy::{Diagnostic, ErrorPolicy, Severity, SeverityMask};
pub use provider::DefaultStackdriverLoggerProvider;
pub use request::{CgiRequestSource, RequestSource, ServerEnv, ServerRequest};
pub use request_logger::{request_start_time, StackdriverRequestLogger};
pub use response::Response;
pub use supervisor::{ExecutionReport, ExecutionState, Invocation, MicroFramework, Rendered};
pub use transport::{Framing, MemoryTransport, Transport, WriterTransport};
