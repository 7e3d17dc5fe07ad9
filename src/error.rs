use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// Errors surfaced by the store/engine layers; mapped to HTTP by
/// `IntoResponse` per the §7 taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum ConsentError {
    #[error("{field} {message}")]
    Validation { field: String, message: String },

    #[error("Consent record not found")]
    NotFound,

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("missing or invalid bearer token")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("active consent already exists for this owner and app")]
    Conflict,

    #[error("storage failure: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("jwks unavailable: {0}")]
    JwksUnavailable(String),

    #[error("internal error: {0}")]
    Internal(#[source] anyhow::Error),
}

impl ConsentError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConsentError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ConsentError::Validation { .. } => "BAD_REQUEST",
            ConsentError::NotFound => "NOT_FOUND",
            ConsentError::InvalidTransition { .. } => "INVALID_TRANSITION",
            ConsentError::Unauthorized => "UNAUTHORIZED",
            ConsentError::Forbidden => "FORBIDDEN",
            ConsentError::Conflict => "CONFLICT",
            ConsentError::Storage(_) => "INTERNAL_ERROR",
            ConsentError::JwksUnavailable(_) => "JWKS_UNAVAILABLE",
            ConsentError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ConsentError::Validation { .. } => StatusCode::BAD_REQUEST,
            ConsentError::NotFound => StatusCode::NOT_FOUND,
            ConsentError::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
            ConsentError::Unauthorized => StatusCode::UNAUTHORIZED,
            ConsentError::Forbidden => StatusCode::FORBIDDEN,
            ConsentError::Conflict => StatusCode::CONFLICT,
            ConsentError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ConsentError::JwksUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ConsentError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to a caller; storage failures are sanitized.
    fn public_message(&self) -> String {
        match self {
            ConsentError::Storage(_) | ConsentError::Internal(_) => {
                "an internal error occurred".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ConsentError {
    fn into_response(self) -> axum::response::Response {
        if matches!(self, ConsentError::Storage(_) | ConsentError::Internal(_)) {
            tracing::error!(error = %self, "request failed");
        }
        let status = self.status();
        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.public_message(),
            }
        }));
        (status, body).into_response()
    }
}

impl From<sqlx::Error> for ConsentError {
    fn from(e: sqlx::Error) -> Self {
        ConsentError::Storage(anyhow::anyhow!(e))
    }
}
