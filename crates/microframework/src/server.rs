//! Development HTTP server
//!
//! Runs every inbound request through one [`MicroFramework::execute`] call on
//! the blocking pool. There is no routing: all paths reach the same
//! application, exactly as they would behind a CGI gateway.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header, StatusCode, Version},
    response::{IntoResponse, Response},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::clock::SystemClock;
use crate::error::FrameworkError;
use crate::factory::Factory;
use crate::integrity::FALLBACK_BODY;
use crate::request::{ServerEnv, ServerRequest};
use crate::supervisor::{Invocation, MicroFramework};
use crate::transport::MemoryTransport;

/// Default limit on request bodies read by the server.
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

/// Builds the collaborators for one request.
///
/// Receives the request's server variables so logger metadata can be bound
/// to it. The server supplies the request itself and the start mark.
pub trait Application: Send + Sync + 'static {
    fn invocation(&self, server: &ServerEnv) -> Invocation;
}

impl<F> Application for F
where
    F: Fn(&ServerEnv) -> Invocation + Send + Sync + 'static,
{
    fn invocation(&self, server: &ServerEnv) -> Invocation {
        self(server)
    }
}

/// Server state
pub struct AppState {
    pub framework: Arc<MicroFramework>,
    pub application: Arc<dyn Application>,
    pub max_body_size: usize,
}

impl AppState {
    pub fn new(framework: MicroFramework, application: impl Application) -> Self {
        Self {
            framework: Arc::new(framework),
            application: Arc::new(application),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(supervise)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Listening");

    axum::serve(
        listener,
        create_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn supervise(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
) -> Response {
    let start_mark = SystemClock::mark();
    let (parts, body) = request.into_parts();

    let server = ServerEnv::from_request_parts(
        &parts.method,
        &parts.uri,
        version_text(parts.version),
        &parts.headers,
        connect_info.map(|ConnectInfo(addr)| addr),
    );
    // A body that cannot be read is a request the supervisor failed to acquire.
    let request = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(body) => ServerRequest::from_env(server.clone(), body),
        Err(e) => Err(FrameworkError::RequestUnavailable(format!(
            "could not read request body: {e}"
        ))),
    };
    let invocation = state
        .application
        .invocation(&server)
        .with_start_mark(start_mark)
        .with_request_factory(Factory::request(move || Ok(request?)));

    let framework = Arc::clone(&state.framework);
    let executed = tokio::task::spawn_blocking(move || {
        let mut transport = MemoryTransport::new();
        framework.execute(invocation, &mut transport);
        transport
    })
    .await;

    match executed {
        Ok(transport) => transport.into_http_response(),
        Err(e) => {
            tracing::error!(error = %e, "Supervisor task did not complete");
            fallback_response()
        }
    }
}

fn fallback_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, "text/plain")],
        Body::from(FALLBACK_BODY),
    )
        .into_response()
}

fn version_text(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2",
        Version::HTTP_3 => "3",
        _ => "1.1",
    }
}
