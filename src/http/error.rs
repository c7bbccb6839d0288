//! Translation of service errors into HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::error::IntakeError;

impl IntakeError {
    /// Status code reported to clients for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            IntakeError::Write(_) | IntakeError::Session(_) => StatusCode::SERVICE_UNAVAILABLE,
            IntakeError::Config(_)
            | IntakeError::Storage(_)
            | IntakeError::Task(_)
            | IntakeError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for IntakeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        error!(status = status.as_u16(), error = %self, "Request failed");

        let body = json!({
            "error": status.canonical_reason().unwrap_or("error"),
            "details": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
