use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Unified error type for the slack-connect service.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // ── Delivery Errors ─────────────────────────────────────────────────
    #[error("Slack rejected the access token as expired")]
    AuthExpired,

    #[error("Message delivery failed: {0}")]
    TransientSend(String),

    // ── Credential Errors ───────────────────────────────────────────────
    #[error("Token refresh failed: {0}")]
    RefreshExchange(String),

    #[error("No refresh token on file for {0}")]
    MissingCredential(String),

    // ── Resource Errors ─────────────────────────────────────────────────
    #[error("{0} not found")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    // ── OAuth Errors ────────────────────────────────────────────────────
    #[error("Invalid state parameter")]
    InvalidState,

    #[error("OAuth error: {0}")]
    OAuth(String),

    #[error("Slack request failed: {0}")]
    Upstream(String),

    // ── Internal ────────────────────────────────────────────────────────
    #[error("Scan for due messages failed: {0}")]
    Scan(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether a delivery failure should trigger a token refresh and one retry.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, AppError::AuthExpired)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!("Database error: {e}");
        AppError::Database(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::AuthExpired => (StatusCode::BAD_GATEWAY, "auth_expired"),
            AppError::TransientSend(_) => (StatusCode::BAD_GATEWAY, "send_failed"),
            AppError::RefreshExchange(_) => (StatusCode::BAD_GATEWAY, "refresh_failed"),
            AppError::MissingCredential(_) => (StatusCode::BAD_GATEWAY, "missing_credential"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::InvalidState => (StatusCode::BAD_REQUEST, "invalid_state"),
            AppError::OAuth(_) => (StatusCode::BAD_REQUEST, "oauth_failed"),
            AppError::Upstream(_) => (StatusCode::BAD_GATEWAY, "upstream_error"),
            AppError::Scan(_) => (StatusCode::INTERNAL_SERVER_ERROR, "scan_failed"),
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        });

        (status, axum::Json(body)).into_response()
    }
}
