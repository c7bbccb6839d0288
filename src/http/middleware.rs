//! Admission control in front of every route.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use super::addr::{client_address, peer_addr};
use super::state::AppState;

/// Reject the request with 429 when the limiter refuses its caller.
pub async fn admission(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(limiter) = &state.limiter else {
        return next.run(request).await;
    };

    let key = client_address(request.headers(), peer_addr(request.extensions()));
    if !limiter.admit(&key) {
        warn!(client = %key, path = %request.uri().path(), "Rate limit exceeded");
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded\n").into_response();
    }

    next.run(request).await
}
