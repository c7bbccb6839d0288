//! Request handlers.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::header::{CONTENT_DISPOSITION, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::addr::ClientAddr;
use super::auth::{not_found, SessionAuth, CSRF_HEADER, SESSION_COOKIE};
use super::state::AppState;
use crate::error::IntakeError;
use crate::stats::{self, Summary, MAX_SCANNED_RECORDS};
use crate::storage::RequestLog;

/// Pause before answering a failed login.
const LOGIN_FAILURE_DELAY: Duration = Duration::from_millis(100);

type HandlerResult = std::result::Result<Response, IntakeError>;

pub async fn health(State(state): State<AppState>) -> Response {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({"status": "healthy", "database": "up"})),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "unhealthy", "database": "down"})),
            )
                .into_response()
        }
    }
}

/// Record any request that matched no other route.
///
/// Write failures are logged and do not change the response.
pub async fn log_request(
    State(state): State<AppState>,
    ClientAddr(source): ClientAddr,
    uri: Uri,
) -> Response {
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());

    if let Err(e) = state.writer.write(&source, path).await {
        error!(error = %e, source = %source, exhausted = e.is_exhausted(), "Failed to log request");
    }

    (
        StatusCode::OK,
        format!("Request logged: {} from {}\n", path, source),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

pub async fn login(
    State(state): State<AppState>,
    ClientAddr(source): ClientAddr,
    Form(form): Form<LoginForm>,
) -> HandlerResult {
    let Some(credentials) = &state.credentials else {
        return Ok(not_found());
    };

    if !credentials.matches(&form.username, &form.password) {
        warn!(source = %source, "Failed login attempt");
        tokio::time::sleep(LOGIN_FAILURE_DELAY).await;
        return Ok((StatusCode::UNAUTHORIZED, "401 unauthorized\n").into_response());
    }

    let session = state.sessions.create(&form.username)?;
    let cookie = format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}",
        SESSION_COOKIE,
        session.session_key,
        state.sessions.ttl().as_secs()
    );

    info!(username = %form.username, source = %source, "User logged in");
    Ok((
        StatusCode::OK,
        [(SET_COOKIE, cookie)],
        Json(json!({"csrf_token": session.csrf_token})),
    )
        .into_response())
}

pub async fn logout(
    State(state): State<AppState>,
    auth: SessionAuth,
    headers: HeaderMap,
) -> Response {
    let presented = headers
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if !state.sessions.verify_csrf(&auth.session_key, presented) {
        warn!(principal = %auth.record.principal, "Logout rejected: CSRF token mismatch");
        return (StatusCode::FORBIDDEN, "403 forbidden\n").into_response();
    }

    state.sessions.delete(&auth.session_key);
    info!(principal = %auth.record.principal, "User logged out");

    let cleared = format!(
        "{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0",
        SESSION_COOKIE
    );
    (StatusCode::NO_CONTENT, [(SET_COOKIE, cleared)]).into_response()
}

async fn recent_logs(state: &AppState) -> std::result::Result<Vec<RequestLog>, IntakeError> {
    Ok(state.store.recent(MAX_SCANNED_RECORDS).await?)
}

/// Summary over the scan window, with the total taken from the whole store.
async fn full_summary(state: &AppState) -> std::result::Result<Summary, IntakeError> {
    let logs = recent_logs(state).await?;
    let mut summary = stats::summary(&logs);
    summary.total_requests = state.store.count().await?;
    Ok(summary)
}

/// Statistics for the session-authenticated view.
pub async fn stats_view(
    auth: SessionAuth,
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> HandlerResult {
    debug!(principal = %auth.record.principal, kind = %kind, "Statistics view requested");

    let render: fn(&[RequestLog]) -> Response = match kind.as_str() {
        "summary" => return Ok(Json(full_summary(&state).await?).into_response()),
        "endpoints" => |logs| Json(stats::endpoint_stats(logs)).into_response(),
        "sources" => |logs| Json(stats::source_stats(logs)).into_response(),
        _ => return Ok(not_found()),
    };

    let logs = recent_logs(&state).await?;
    Ok(render(&logs))
}

pub async fn stats_summary(State(state): State<AppState>) -> HandlerResult {
    let summary = full_summary(&state).await?;
    info!(
        total_requests = summary.total_requests,
        scanned_records = summary.scanned_records,
        unique_sources = summary.unique_sources,
        unique_paths = summary.unique_paths,
        "Summary stats retrieved"
    );
    Ok(Json(summary).into_response())
}

pub async fn stats_endpoints(State(state): State<AppState>) -> HandlerResult {
    let logs = recent_logs(&state).await?;
    let endpoints = stats::endpoint_stats(&logs);
    info!(count = endpoints.len(), "Endpoint stats retrieved");
    Ok(Json(endpoints).into_response())
}

pub async fn stats_sources(State(state): State<AppState>) -> HandlerResult {
    let logs = recent_logs(&state).await?;
    let sources = stats::source_stats(&logs);
    info!(count = sources.len(), "Source stats retrieved");
    Ok(Json(sources).into_response())
}

/// Every stored record as a JSON attachment.
pub async fn stats_download(State(state): State<AppState>) -> HandlerResult {
    let logs = state.store.recent(0).await?;
    info!(count = logs.len(), "Request logs downloaded");
    Ok((
        [(CONTENT_DISPOSITION, "attachment; filename=\"request_logs.json\"")],
        Json(logs),
    )
        .into_response())
}
