use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Message returned to callers for every 5xx-class failure.
pub const GENERIC_FAILURE: &str = "Something went wrong, sorry.";

/// Unified error type for the Twitch link service.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    // ── Caller Errors ───────────────────────────────────────────────────
    #[error("You are currently not logged in.")]
    Unauthenticated,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Returned state did not match provided state.")]
    InvalidState,

    // ── Provider Errors ─────────────────────────────────────────────────
    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    // ── Bot Registry ────────────────────────────────────────────────────
    #[error("No bot registered for channel {0}")]
    NotFound(String),

    #[error("A bot is already registered for channel {0}")]
    AlreadyRunning(String),

    #[error("Registry and store disagree: {0}")]
    Inconsistency(String),

    // ── Internal ────────────────────────────────────────────────────────
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LinkError {
    /// HTTP status and machine-readable code for this error.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            LinkError::Unauthenticated => (StatusCode::UNAUTHORIZED, "unauthorized"),
            LinkError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            LinkError::InvalidState => (StatusCode::BAD_REQUEST, "invalid_state"),
            LinkError::TokenExchange(_) => (StatusCode::BAD_REQUEST, "invalid_token_exchange"),
            LinkError::Upstream(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_sorry"),
            LinkError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            LinkError::AlreadyRunning(_) => (StatusCode::CONFLICT, "already_running"),
            LinkError::Inconsistency(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            LinkError::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            LinkError::Crypto(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            LinkError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl From<sqlx::Error> for LinkError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!("Database error: {e}");
        LinkError::Persistence(e.to_string())
    }
}

impl From<reqwest::Error> for LinkError {
    fn from(e: reqwest::Error) -> Self {
        LinkError::Upstream(e.to_string())
    }
}

impl IntoResponse for LinkError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Server-side detail stays in the logs.
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            GENERIC_FAILURE.to_string()
        } else {
            self.to_string()
        };

        let body = json!({
            "code": status.as_u16(),
            "error": {
                "error_code": code,
                "error_message": message,
            }
        });

        (status, axum::Json(body)).into_response()
    }
}
