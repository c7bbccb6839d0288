//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::auth::require_basic_auth;
use super::handlers;
use super::middleware::admission;
use super::state::AppState;
use crate::error::{IntakeError, Result};

/// Build the application router.
///
/// Login, logout and the session-authenticated statistics views are only
/// routed when operator credentials are configured.
pub fn router(state: AppState) -> Router {
    let stats = Router::new()
        .route("/stats/summary", get(handlers::stats_summary))
        .route("/stats/endpoints", get(handlers::stats_endpoints))
        .route("/stats/sources", get(handlers::stats_sources))
        .route("/stats/download", get(handlers::stats_download))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_basic_auth,
        ));

    let mut app = Router::new()
        .route("/health", get(handlers::health))
        .merge(stats);

    if state.credentials.is_some() {
        app = app
            .route("/login", post(handlers::login))
            .route("/logout", post(handlers::logout))
            .route("/stats-view/{kind}", get(handlers::stats_view));
    }

    app.fallback(handlers::log_request)
        .layer(axum::middleware::from_fn_with_state(state.clone(), admission))
        .with_state(state)
}

/// HTTP server for the intake service.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Shared handler state
    state: AppState,
    /// Upper bound on handling one request
    request_timeout: Duration,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self {
            addr,
            state,
            request_timeout: Duration::from_secs(15),
        }
    }

    /// Set the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// The router with tracing and timeout layers applied.
    pub fn app(&self) -> Router {
        router(self.state.clone())
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                self.request_timeout,
            ))
            .layer(TraceLayer::new_for_http())
    }

    /// Bind and serve until `signal` resolves, then drain in-flight requests.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            IntakeError::Io(e)
        })?;
        self.serve_listener(listener, signal).await
    }

    /// Serve on an already bound listener until `signal` resolves.
    pub async fn serve_listener<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        info!(
            addr = %local_addr,
            timeout_secs = self.request_timeout.as_secs(),
            "Starting HTTP server with graceful shutdown"
        );

        let app = self.app();
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            IntakeError::Io(e)
        })
    }
}
