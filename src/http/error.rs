//! Mapping of service errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::error::RatekeeperError;

impl RatekeeperError {
    /// Status code reported to HTTP clients.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RatekeeperError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            RatekeeperError::Conflict(_) => StatusCode::CONFLICT,
            RatekeeperError::NotFound(_) => StatusCode::NOT_FOUND,
            RatekeeperError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RatekeeperError::Config(_) | RatekeeperError::Store(_) | RatekeeperError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for RatekeeperError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            error!(error = %self, "Request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
