//! HTTP server for the SSE and streamable-HTTP transports.
//!
//! Both transports share one [`McpServer`]; only the session bookkeeping and
//! the framing differ. `/health` and `/metrics` sit outside the auth gate.

pub mod auth;
pub mod sse;
pub mod streamable;

use axum::{
    extract::State,
    http::{header, Request},
    middleware,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use dashmap::DashMap;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tower::ServiceExt;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::{RequestBodyTimeoutLayer, TimeoutLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::config::{Config, HttpTimeouts, Transport};
use crate::error::{Error, Result};
use crate::mcp::protocol::JsonRpcMessage;
use crate::mcp::server::McpServer;

use self::auth::AuthGate;

/// Endpoint of the SSE transport.
pub const SSE_PATH: &str = "/sse";

/// Endpoint of the streamable-HTTP transport.
pub const MCP_PATH: &str = "/mcp";

/// Session id header of the streamable-HTTP transport.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// HTTP server state.
#[derive(Clone)]
pub struct HttpState {
    server: Arc<McpServer>,
    auth: Arc<AuthGate>,
    /// Open SSE streams, keyed by session id.
    sse_sessions: Arc<DashMap<String, mpsc::Sender<JsonRpcMessage>>>,
    /// Initialized streamable-HTTP sessions and when each was last used.
    http_sessions: Arc<DashMap<String, Instant>>,
}

impl HttpState {
    pub fn new(server: Arc<McpServer>, auth: AuthGate) -> Self {
        Self {
            server,
            auth: Arc::new(auth),
            sse_sessions: Arc::new(DashMap::new()),
            http_sessions: Arc::new(DashMap::new()),
        }
    }
}

/// Build the router for an HTTP transport.
pub fn router(config: &Config, server: Arc<McpServer>) -> Result<Router> {
    let state = HttpState::new(
        server,
        AuthGate::new(config.auth_header.clone(), config.auth_value.clone()),
    );

    let endpoints = match config.transport {
        Transport::Sse => Router::new().route(SSE_PATH, get(sse::connect).post(sse::message)),
        Transport::StreamableHttp => {
            streamable::spawn_session_sweeper(&state, &config.timeouts);
            Router::new().route(
                MCP_PATH,
                get(streamable::reject_stream)
                    .post(streamable::message)
                    .delete(streamable::terminate),
            )
        }
        Transport::Stdio => {
            return Err(Error::Config(
                "stdio transport has no HTTP endpoints".to_string(),
            ))
        }
    };

    // The handler timeout ends once response headers are produced, so a
    // long-lived SSE body is not cut off by it.
    let endpoints = endpoints
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_auth))
        .layer(TimeoutLayer::new(config.timeouts.write))
        .layer(RequestBodyTimeoutLayer::new(config.timeouts.read));

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .merge(endpoints)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    Ok(app)
}

/// Start the HTTP server.
pub async fn start_server(config: &Config, server: Arc<McpServer>) -> Result<()> {
    let app = router(config, server)?;

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;

    match config.transport {
        Transport::Sse => info!("SSE server listening on {}{}", addr, SSE_PATH),
        _ => info!("Streamable HTTP server listening on {}{}", addr, MCP_PATH),
    }
    if !config.auth_header.is_empty() {
        info!("Auth gate enabled on header {}", config.auth_header);
    }

    serve(listener, app, config.timeouts).await
}

/// Accept connections until the listener fails.
///
/// Driven by hyper directly so idle keep-alive connections are closed after
/// `timeouts.idle` without a new request header.
pub async fn serve(listener: TcpListener, app: Router, timeouts: HttpTimeouts) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let tower_service = app.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let hyper_service = hyper::service::service_fn(move |request: Request<Incoming>| {
                tower_service.clone().oneshot(request)
            });

            let mut builder = auto::Builder::new(TokioExecutor::new());
            builder
                .http1()
                .timer(TokioTimer::new())
                .header_read_timeout(timeouts.idle);

            if let Err(e) = builder.serve_connection_with_upgrades(io, hyper_service).await {
                debug!("Connection from {} closed: {}", peer, e);
            }
        });
    }
}

/// Health check endpoint.
async fn health_check(State(state): State<HttpState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "name": state.server.info().name,
        "version": crate::VERSION,
        "in_flight": state.server.in_flight(),
    }))
}

/// Prometheus metrics endpoint.
async fn metrics(State(state): State<HttpState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.server.metrics().to_prometheus(),
    )
}
