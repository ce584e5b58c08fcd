//! Blackbox tests: one request in, one response and one completion entry out.

use axum::body::Body;
use microframework::server::{create_router, AppState};
use microframework::{
    cgi, DefaultStackdriverLoggerProvider, ExecutionReport, ExecutionState, Factory,
    FrameworkConfig, HandlerContext, HrTime, Invocation, LoggerProvider, MemoryTransport,
    MicroFramework, Rendered, RequestHandler, RequestLogger, Response, ServerEnv, ServerRequest,
    Severity, SeverityMask, StackdriverRequestLogger, Transport, FALLBACK_BODY,
};
use microframework_logging::{
    LogContext, LogDestination, LogLevel, Logger, LoggerCell, MemoryLogger, SharedBuffer,
};
use proptest::prelude::*;
use std::sync::Arc;
use tower::ServiceExt;

struct MemoryProvider {
    logger: Arc<MemoryLogger>,
}

impl LoggerProvider for MemoryProvider {
    fn get_logger(&self) -> anyhow::Result<Arc<dyn Logger>> {
        let logger: Arc<dyn Logger> = self.logger.clone();
        Ok(logger)
    }

    fn get_request_logger(&self) -> Box<dyn RequestLogger> {
        Box::new(StackdriverRequestLogger::new())
    }
}

struct BrokenProvider;

impl LoggerProvider for BrokenProvider {
    fn get_logger(&self) -> anyhow::Result<Arc<dyn Logger>> {
        anyhow::bail!("Logging backend unavailable")
    }

    fn get_request_logger(&self) -> Box<dyn RequestLogger> {
        Box::new(StackdriverRequestLogger::new())
    }
}

struct PanickingRequestLogger;

impl RequestLogger for PanickingRequestLogger {
    fn log_request(&self, _logger: &dyn Logger, _start_mark: HrTime, _status: u16) {
        panic!("Request log backend exploded")
    }
}

/// Hands out a working logger but a request logger that always panics.
struct FlakyRequestLogProvider {
    logger: Arc<MemoryLogger>,
}

impl LoggerProvider for FlakyRequestLogProvider {
    fn get_logger(&self) -> anyhow::Result<Arc<dyn Logger>> {
        let logger: Arc<dyn Logger> = self.logger.clone();
        Ok(logger)
    }

    fn get_request_logger(&self) -> Box<dyn RequestLogger> {
        Box::new(PanickingRequestLogger)
    }
}

struct Outcome {
    transport: MemoryTransport,
    report: ExecutionReport,
    logger: Arc<MemoryLogger>,
    fallback: Arc<MemoryLogger>,
}

impl Outcome {
    fn assert_fallback(&self) {
        assert_eq!(self.transport.status(), 500);
        assert_eq!(self.transport.body_text(), FALLBACK_BODY);
        assert_eq!(self.transport.header("content-type"), Some("text/plain"));
        assert_eq!(self.report.rendered, Rendered::Fallback);
    }

    fn logged_uncaught(&self, needle: &str) -> bool {
        self.logger.has_record_that_contains(LogLevel::Emergency, needle)
    }
}

fn handler<F>(f: F) -> Factory<HandlerContext>
where
    F: Fn(&HandlerContext, ServerRequest) -> anyhow::Result<Response> + Send + 'static,
{
    Factory::handler(move |ctx: HandlerContext| Ok(move |request: ServerRequest| f(&ctx, request)))
}

fn get_request() -> Factory {
    Factory::request(|| {
        let server = ServerEnv::new()
            .with("REQUEST_METHOD", "GET")
            .with("REQUEST_URI", "/blackbox?check=1");
        Ok(ServerRequest::from_env(server, Default::default())?)
    })
}

fn run_with(
    framework: MicroFramework,
    handler_factory: Factory<HandlerContext>,
    mut transport: MemoryTransport,
) -> Outcome {
    let logger = Arc::new(MemoryLogger::with_request_log());
    let fallback = Arc::new(MemoryLogger::new());
    let framework = framework.with_fallback_logger(fallback.clone());

    let provider_logger = Arc::clone(&logger);
    let invocation = Invocation::new(
        Factory::logger_provider(move || {
            Ok(MemoryProvider {
                logger: provider_logger,
            })
        }),
        handler_factory,
    )
    .with_request_factory(get_request());

    let report = framework.execute(invocation, &mut transport);
    Outcome {
        transport,
        report,
        logger,
        fallback,
    }
}

fn run(handler_factory: Factory<HandlerContext>) -> Outcome {
    run_with(MicroFramework::default(), handler_factory, MemoryTransport::new())
}

fn respond(response: Response) -> Outcome {
    run(handler(move |_, _| Ok(response.clone())))
}

#[test]
fn test_renders_handler_response() {
    let outcome = run(handler(|_, request| {
        Ok(Response::ok(format!("Hello from {}", request.uri().path())))
    }));

    assert_eq!(outcome.transport.status(), 200);
    assert_eq!(outcome.transport.reason(), "OK");
    assert_eq!(outcome.transport.body_text(), "Hello from /blackbox");
    assert_eq!(
        outcome.transport.header("content-type"),
        Some("text/html; charset=UTF-8")
    );

    assert_eq!(outcome.report.final_state, ExecutionState::Completed);
    assert_eq!(outcome.report.rendered, Rendered::Response);
    assert_eq!(outcome.report.failure, None);
    assert!(outcome.report.request_logged);
    assert!(outcome.logger.records().is_empty());

    let completions = outcome.logger.completions();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].status, 200);
}

#[test]
fn test_renders_handler_status_codes() {
    for status in [200_u16, 202, 404, 500, 502] {
        let outcome = respond(Response::new(status).with_body(format!("Status {status}")));

        assert_eq!(outcome.transport.status(), status);
        assert_eq!(outcome.transport.body_text(), format!("Status {status}"));
        assert_eq!(outcome.report.rendered, Rendered::Response, "status {status}");
        assert_eq!(outcome.logger.completions()[0].status, status);
    }
}

#[test]
fn test_renders_custom_status_with_explicit_reason() {
    let outcome = respond(Response::new(599).with_reason("Lost in Space"));

    assert_eq!(outcome.transport.status(), 599);
    assert_eq!(outcome.transport.reason(), "Lost in Space");
    assert_eq!(outcome.transport.body_text(), "");
    assert_eq!(outcome.report.rendered, Rendered::Response);
}

#[test]
fn test_custom_status_without_reason_falls_back() {
    let outcome = respond(Response::new(599));

    outcome.assert_fallback();
    assert_eq!(
        outcome.report.failure.as_deref(),
        Some("header_rendering_violation")
    );
    assert!(outcome.logged_uncaught(
        "HTTP reason phrase cannot be empty and there is no default for status \"599\""
    ));
    assert_eq!(outcome.logger.completions()[0].status, 500);
}

#[test]
fn test_custom_content_type_is_kept_whatever_its_case() {
    for name in ["Content-Type", "content-type", "CONTENT-TYPE"] {
        let response = Response::ok("{}").try_with_header(name, "application/json").unwrap();
        let outcome = respond(response);

        assert_eq!(outcome.transport.status(), 200);
        assert_eq!(
            outcome.transport.header("content-type"),
            Some("application/json"),
            "header sent as {name}"
        );
        assert_eq!(outcome.transport.headers().get_all("content-type").iter().count(), 1);
    }
}

#[test]
fn test_sends_handler_headers() {
    let response = Response::ok("cached")
        .try_with_header("Cache-Control", "max-age=60")
        .unwrap()
        .try_with_header("X-Request-Source", "blackbox")
        .unwrap();
    let outcome = respond(response);

    assert_eq!(outcome.transport.header("cache-control"), Some("max-age=60"));
    assert_eq!(outcome.transport.header("x-request-source"), Some("blackbox"));
}

#[test]
fn test_multiple_header_values_fall_back() {
    let response = Response::ok("cookies")
        .try_with_header("X-Thing", "a")
        .unwrap()
        .try_with_header("x-thing", "b")
        .unwrap();
    let outcome = respond(response);

    outcome.assert_fallback();
    assert!(outcome.logged_uncaught("Cannot specify multiple values for the x-thing header"));
}

#[test]
fn test_reason_with_line_break_falls_back() {
    let outcome = respond(Response::ok("x").with_reason("OK\r\nSet-Cookie: evil=1"));

    outcome.assert_fallback();
    assert_eq!(
        outcome.report.failure.as_deref(),
        Some("header_rendering_violation")
    );
    assert!(outcome.transport.header("set-cookie").is_none());
    assert!(outcome.logged_uncaught("Invalid HTTP reason phrase"));
}

#[test]
fn test_status_outside_three_digits_falls_back() {
    for status in [0_u16, 42, 1000] {
        let outcome = respond(Response::new(status).with_reason("Weird").with_body("x"));

        outcome.assert_fallback();
        assert!(outcome.logged_uncaught(&format!("Invalid HTTP status code \"{status}\"")));
    }
}

#[test]
fn test_malformed_protocol_version_falls_back() {
    let outcome = respond(Response::ok("x").with_version("1.1 200 OK\r\nX-Injected: 1\r\nY:"));

    outcome.assert_fallback();
    assert!(outcome.transport.header("x-injected").is_none());
    assert!(outcome.logged_uncaught("Invalid HTTP protocol version"));
}

#[test]
fn test_output_before_execution_keeps_status_and_appends_fallback() {
    let mut transport = MemoryTransport::new();
    transport
        .write_body(b"I am a badly behaving dependency\n")
        .unwrap();

    let outcome = run_with(
        MicroFramework::default(),
        handler(|_, _| Ok(Response::ok("Never sent"))),
        transport,
    );

    assert_eq!(outcome.transport.status(), 200);
    assert_eq!(
        outcome.transport.body_text(),
        "I am a badly behaving dependency\nUnexpected fatal error\n"
    );
    assert_eq!(outcome.report.rendered, Rendered::Fallback);
    assert_eq!(
        outcome.report.failure.as_deref(),
        Some("output_integrity_violation")
    );
    assert!(outcome.logged_uncaught("Headers already sent"));
    assert_eq!(outcome.logger.completions()[0].status, 200);
}

#[test]
fn test_printed_output_fails_the_request() {
    let outcome = run(handler(|ctx, _| {
        ctx.output.echo("Some output the handler should not have printed");
        Ok(Response::ok("Never sent"))
    }));

    outcome.assert_fallback();
    assert!(outcome.logged_uncaught(
        "Unexpected buffered output during request (Some output the handler should not have pri"
    ));
    assert!(!outcome.transport.body_text().contains("Some output"));
}

#[test]
fn test_unreleased_capture_scope_fails_the_request() {
    let outcome = run(handler(|ctx, _| {
        let _scope = ctx.output.begin_capture();
        ctx.output.echo("Buffered");
        Ok(Response::ok("Never sent"))
    }));

    outcome.assert_fallback();
    assert!(outcome.logged_uncaught("Unexpected buffered output during request (Buffered"));
}

#[test]
fn test_flushed_capture_scope_fails_the_request() {
    let outcome = run(handler(|ctx, _| {
        let scope = ctx.output.begin_capture();
        ctx.output.echo("Flushed");
        scope.flush()?;
        Ok(Response::ok("Never sent"))
    }));

    outcome.assert_fallback();
    assert!(outcome.logged_uncaught("(Flushed"));
}

#[test]
fn test_balanced_capture_can_become_the_body() {
    let outcome = run(handler(|ctx, _| {
        let scope = ctx.output.begin_capture();
        ctx.output.echo("Rendered by a template");
        Ok(Response::ok(scope.take_string()?))
    }));

    assert_eq!(outcome.transport.status(), 200);
    assert_eq!(outcome.transport.body_text(), "Rendered by a template");
}

#[test]
fn test_discarded_capture_is_not_sent() {
    let outcome = run(handler(|ctx, _| {
        let scope = ctx.output.begin_capture();
        ctx.output.echo("Buffered");
        scope.discard()?;
        Ok(Response::ok("Discarded"))
    }));

    assert_eq!(outcome.transport.status(), 200);
    assert_eq!(outcome.transport.body_text(), "Discarded");
}

#[test]
fn test_handler_factory_error_falls_back() {
    let outcome = run(Factory::typed(
        |_ctx: HandlerContext| -> anyhow::Result<Box<dyn RequestHandler>> {
            anyhow::bail!("No handler configured")
        },
    ));

    outcome.assert_fallback();
    assert_eq!(outcome.report.failure.as_deref(), Some("factory_failed"));
    assert_eq!(outcome.report.failed_in, Some(ExecutionState::RequestAcquired));
    assert!(outcome.logged_uncaught("No handler configured"));
    assert!(outcome.report.request_logged);
    assert_eq!(outcome.logger.completions()[0].status, 500);
}

#[test]
fn test_handler_factory_of_wrong_type_falls_back() {
    let outcome = run(Factory::value(String::from("not a handler")));

    outcome.assert_fallback();
    assert_eq!(
        outcome.report.failure.as_deref(),
        Some("factory_type_mismatch")
    );
    assert!(outcome.logged_uncaught("incorrectly returned alloc::string::String"));
}

#[test]
fn test_handler_error_falls_back() {
    let outcome = run(handler(|_, _| anyhow::bail!("Handler broke")));

    outcome.assert_fallback();
    assert_eq!(outcome.report.failure.as_deref(), Some("handler_failure"));
    assert!(outcome.logged_uncaught("Uncaught HandlerFailure: Handler broke during"));

    let record = &outcome.logger.records()[0];
    assert_eq!(record.context["exception"]["msg"], "Handler broke");
    assert_eq!(record.context["exception"]["class"], "HandlerFailure");
}

#[test]
fn test_reported_diagnostic_falls_back_with_location() {
    let outcome = run(handler(|ctx, _| {
        ctx.errors.check(Severity::Warning, "Undefined variable $foo")?;
        Ok(Response::ok("Never sent"))
    }));

    outcome.assert_fallback();
    assert!(outcome.logged_uncaught("Warning: Undefined variable $foo at "));
    assert!(outcome.logged_uncaught("integration.rs:"));
}

#[test]
fn test_masked_diagnostic_does_not_interrupt() {
    let config = FrameworkConfig::builder()
        .error_reporting(SeverityMask::ALL.without(Severity::Deprecated))
        .build();
    let outcome = run_with(
        MicroFramework::new(config),
        handler(|ctx, _| {
            ctx.errors.check(Severity::Deprecated, "Old API")?;
            Ok(Response::ok("Carried on"))
        }),
        MemoryTransport::new(),
    );

    assert_eq!(outcome.transport.status(), 200);
    assert_eq!(outcome.transport.body_text(), "Carried on");
}

#[test]
fn test_panicking_handler_falls_back() {
    let outcome = run(handler(|_, _| panic!("Handler exploded")));

    outcome.assert_fallback();
    assert_eq!(outcome.report.failure.as_deref(), Some("handler_failure"));
    assert!(outcome.logged_uncaught("Handler exploded at "));
    assert!(outcome.logged_uncaught("integration.rs:"));
    assert_eq!(outcome.logger.completions()[0].status, 500);
}

#[test]
fn test_handler_can_log_through_context() {
    let outcome = run(handler(|ctx, _| {
        ctx.logger.notice("Something happened", LogContext::new());
        Ok(Response::ok("Logged"))
    }));

    assert_eq!(outcome.transport.status(), 200);
    assert!(outcome
        .logger
        .has_record_that_contains(LogLevel::Notice, "Something happened"));
    assert!(outcome.fallback.records().is_empty());
}

#[test]
fn test_handler_sees_execution_defaults() {
    let config = FrameworkConfig::builder()
        .default_timezone("UTC")
        .default_locale("en_US.utf-8")
        .build();
    let outcome = run_with(
        MicroFramework::new(config),
        handler(|ctx, _| {
            Ok(Response::ok(format!(
                "{} {}",
                ctx.execution.default_timezone, ctx.execution.default_locale
            )))
        }),
        MemoryTransport::new(),
    );

    assert_eq!(outcome.transport.body_text(), "UTC en_US.utf-8");
}

#[test]
fn test_failing_logger_provider_uses_fallback_logger() {
    let fallback = Arc::new(MemoryLogger::new());
    let framework = MicroFramework::default().with_fallback_logger(fallback.clone());
    let invocation = Invocation::new(
        Factory::logger_provider(|| Ok(BrokenProvider)),
        handler(|_, _| Ok(Response::ok("Never sent"))),
    )
    .with_request_factory(get_request());

    let mut transport = MemoryTransport::new();
    let report = framework.execute(invocation, &mut transport);

    assert_eq!(transport.status(), 500);
    assert_eq!(transport.body_text(), FALLBACK_BODY);
    assert!(!report.request_logged);
    assert_eq!(report.failed_in, Some(ExecutionState::ErrorPolicyInstalled));
    assert!(fallback.has_record_that_contains(LogLevel::Emergency, "Logging backend unavailable"));
}

#[test]
fn test_logger_provider_of_wrong_type_is_not_request_logged() {
    let fallback = Arc::new(MemoryLogger::new());
    let framework = MicroFramework::default().with_fallback_logger(fallback.clone());
    let invocation = Invocation::new(
        Factory::value(42_u32),
        handler(|_, _| Ok(Response::ok("Never sent"))),
    );

    let mut transport = MemoryTransport::new();
    let report = framework.execute(invocation, &mut transport);

    assert_eq!(transport.status(), 500);
    assert_eq!(report.failure.as_deref(), Some("factory_type_mismatch"));
    assert!(!report.request_logged);
    assert!(fallback.has_record_that_contains(LogLevel::Emergency, "incorrectly returned u32"));
}

#[test]
fn test_request_factory_error_falls_back() {
    let logger = Arc::new(MemoryLogger::with_request_log());
    let provider_logger = Arc::clone(&logger);
    let invocation = Invocation::new(
        Factory::logger_provider(move || {
            Ok(MemoryProvider {
                logger: provider_logger,
            })
        }),
        handler(|_, _| Ok(Response::ok("Never sent"))),
    )
    .with_request_factory(Factory::request(|| anyhow::bail!("No request")));

    let mut transport = MemoryTransport::new();
    let report = MicroFramework::default().execute(invocation, &mut transport);

    assert_eq!(transport.status(), 500);
    assert_eq!(report.failed_in, Some(ExecutionState::LoggerAcquired));
    assert!(logger.has_record_that_contains(LogLevel::Emergency, "No request"));
    assert_eq!(logger.completions()[0].status, 500);
}

#[test]
fn test_logger_without_request_sink_reports_an_error() {
    let logger = Arc::new(MemoryLogger::new());
    let provider_logger = Arc::clone(&logger);
    let invocation = Invocation::new(
        Factory::logger_provider(move || {
            Ok(MemoryProvider {
                logger: provider_logger,
            })
        }),
        handler(|_, _| Ok(Response::ok("Still sent"))),
    )
    .with_request_factory(get_request());

    let mut transport = MemoryTransport::new();
    let report = MicroFramework::default().execute(invocation, &mut transport);

    assert_eq!(transport.status(), 200);
    assert_eq!(transport.body_text(), "Still sent");
    assert!(report.request_logged);
    assert!(logger.has_error_that_contains("Could not log request details - got a"));
}

#[test]
fn test_panicking_request_logger_is_swallowed() {
    let logger = Arc::new(MemoryLogger::with_request_log());
    let provider_logger = Arc::clone(&logger);
    let invocation = Invocation::new(
        Factory::logger_provider(move || {
            Ok(FlakyRequestLogProvider {
                logger: provider_logger,
            })
        }),
        handler(|_, _| Ok(Response::ok("fine"))),
    )
    .with_request_factory(get_request());

    let mut transport = MemoryTransport::new();
    let report = MicroFramework::default().execute(invocation, &mut transport);

    assert_eq!(transport.status(), 200);
    assert_eq!(transport.body_text(), "fine");
    assert_eq!(report.rendered, Rendered::Response);
    assert_eq!(report.final_state, ExecutionState::Completed);
    assert!(!report.request_logged);
    assert!(logger.records().is_empty());
    assert!(logger.completions().is_empty());
}

fn cgi_invocation(logs: &SharedBuffer, handler_factory: Factory<HandlerContext>) -> Invocation {
    let logs = logs.clone();
    Invocation::new(
        Factory::logger_provider(move || {
            Ok(DefaultStackdriverLoggerProvider::new("cgi-svc", "/no/version/file")
                .with_destination(LogDestination::Memory(logs))
                .with_cell(LoggerCell::new())
                .with_server_env(ServerEnv::new().with("REQUEST_METHOD", "GET")))
        }),
        handler_factory,
    )
    .with_request_factory(get_request())
}

#[test]
fn test_cgi_output_is_exactly_head_and_body() {
    let logs = SharedBuffer::new();
    let (report, output) = cgi::respond(
        &MicroFramework::default(),
        cgi_invocation(&logs, handler(|_, _| Ok(Response::ok("Blackbox is alive")))),
        Vec::new(),
    );

    assert!(report.request_logged);
    assert_eq!(
        String::from_utf8(output).unwrap(),
        "Status: 200 OK\r\nContent-Type: text/html; charset=UTF-8\r\n\r\nBlackbox is alive"
    );
    assert_eq!(logs.entries().len(), 1);
}

#[test]
fn test_cgi_failure_output_is_exactly_the_fallback() {
    let logs = SharedBuffer::new();
    let (_, output) = cgi::respond(
        &MicroFramework::default(),
        cgi_invocation(&logs, handler(|_, _| anyhow::bail!("Handler broke"))),
        Vec::new(),
    );

    assert_eq!(
        String::from_utf8(output).unwrap(),
        "Status: 500 Internal Server Error\r\nContent-Type: text/plain\r\n\r\nUnexpected fatal error\n"
    );
    let entries = logs.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["severity"], "EMERGENCY");
    assert_eq!(entries[1]["@ingenType"], "rqst");
}

#[test]
fn test_cgi_never_logs_to_stdout() {
    assert!(matches!(
        cgi::log_destination(Some(LogDestination::Stdout)),
        LogDestination::Stderr
    ));
    assert!(matches!(cgi::log_destination(None), LogDestination::Stderr));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_explicit_reason_is_sent_for_any_status(
        status in 200_u16..600,
        reason in "[A-Za-z][A-Za-z ]{0,19}",
    ) {
        let outcome = respond(Response::new(status).with_reason(reason.clone()));

        prop_assert_eq!(outcome.transport.status(), status);
        prop_assert_eq!(outcome.transport.reason(), reason.as_str());
        prop_assert_eq!(outcome.report.rendered, Rendered::Response);
    }
}

fn router_state() -> Arc<AppState> {
    Arc::new(AppState::new(
        MicroFramework::default(),
        |_server: &ServerEnv| {
            Invocation::new(
                Factory::logger_provider(|| {
                    Ok(MemoryProvider {
                        logger: Arc::new(MemoryLogger::with_request_log()),
                    })
                }),
                handler(|_, request| match request.uri().path() {
                    "/custom" => Ok(Response::new(599).with_reason("Lost in Space")),
                    "/broken" => anyhow::bail!("Broken route"),
                    path => Ok(Response::ok(format!(
                        "{} {} {}",
                        request.method(),
                        path,
                        request.query_params().get("name").cloned().unwrap_or_default()
                    ))),
                }),
            )
        },
    ))
}

async fn call(path: &str) -> axum::response::Response {
    let request = axum::http::Request::builder()
        .uri(path)
        .body(Body::empty())
        .unwrap();
    create_router(router_state()).oneshot(request).await.unwrap()
}

#[tokio::test]
async fn test_server_supervises_requests() {
    let response = call("/hello?name=world").await;

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"],
        "text/html; charset=UTF-8"
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"GET /hello world");
}

#[tokio::test]
async fn test_server_keeps_custom_reason_phrase() {
    let response = call("/custom").await;

    assert_eq!(response.status().as_u16(), 599);
    let reason = response
        .extensions()
        .get::<hyper::ext::ReasonPhrase>()
        .unwrap();
    assert_eq!(reason.as_bytes(), b"Lost in Space");
}

#[tokio::test]
async fn test_server_sends_fallback_on_failure() {
    let response = call("/broken").await;

    assert_eq!(response.status(), 500);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], FALLBACK_BODY.as_bytes());
}

#[tokio::test]
async fn test_server_logs_unreadable_body_through_supervisor() {
    let logger = Arc::new(MemoryLogger::with_request_log());
    let shared = Arc::clone(&logger);
    let state = AppState::new(MicroFramework::default(), move |_server: &ServerEnv| {
        let logger = Arc::clone(&shared);
        Invocation::new(
            Factory::logger_provider(move || Ok(MemoryProvider { logger })),
            handler(|_, _| Ok(Response::ok("Never sent"))),
        )
    })
    .with_max_body_size(8);

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/upload")
        .body(Body::from("far more than eight bytes"))
        .unwrap();
    let response = create_router(Arc::new(state)).oneshot(request).await.unwrap();

    assert_eq!(response.status(), 500);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], FALLBACK_BODY.as_bytes());

    let records = logger.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].level, LogLevel::Emergency);
    assert!(records[0].message.contains("could not read request body"));

    let completions = logger.completions();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].status, 500);
}
