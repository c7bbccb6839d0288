//! Session and HTTP Basic authentication.
//!
//! Unauthenticated callers receive the same plain 404 an unknown path
//! would produce, so protected routes are not advertised.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, error};

use super::addr::{client_address, peer_addr};
use super::state::AppState;
use crate::session::SessionRecord;

/// Cookie carrying the session key.
pub const SESSION_COOKIE: &str = "session_id";
/// Header carrying the CSRF token on state-changing requests.
pub const CSRF_HEADER: &str = "x-csrf-token";

pub(crate) fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "404 page not found\n").into_response()
}

/// Value of the session cookie, if the request carries one.
pub(crate) fn session_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

/// An authenticated session, resolved from the session cookie.
///
/// Rejection records the request through the writer and answers 404.
#[derive(Debug, Clone)]
pub struct SessionAuth {
    pub session_key: String,
    pub record: SessionRecord,
}

impl FromRequestParts<AppState> for SessionAuth {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(session_key) = session_cookie(&parts.headers) {
            if let Some(record) = state.sessions.get(session_key) {
                return Ok(SessionAuth {
                    session_key: session_key.to_owned(),
                    record,
                });
            }
        }

        let source = client_address(&parts.headers, peer_addr(&parts.extensions));
        debug!(source = %source, path = %parts.uri.path(), "Rejected unauthenticated request");

        if let Err(e) = state.writer.write(&source, parts.uri.path()).await {
            error!(error = %e, source = %source, "Failed to log request");
        }

        Err(not_found())
    }
}

/// Decode `Authorization: Basic` credentials.
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_owned(), password.to_owned()))
}

/// Require HTTP Basic credentials when the operator configured them.
pub async fn require_basic_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(credentials) = &state.credentials else {
        return next.run(request).await;
    };

    match basic_credentials(request.headers()) {
        Some((username, password)) if credentials.matches(&username, &password) => {
            next.run(request).await
        }
        _ => {
            debug!(path = %request.uri().path(), "Basic authentication failed");
            not_found()
        }
    }
}
