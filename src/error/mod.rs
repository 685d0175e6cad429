use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Result type for ratekeeper operations
pub type Result<T> = std::result::Result<T, LimiterError>;

/// Ratekeeper error types
#[derive(Error, Debug)]
pub enum LimiterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid policy for {category}: {reason}")]
    InvalidPolicy { category: String, reason: String },

    #[error("Unknown rate limit category: {0}")]
    UnknownCategory(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Upstream throttled {category}, retry after {retry_after:?}")]
    UpstreamThrottled {
        category: String,
        retry_after: Duration,
    },

    #[error("Upstream returned {status} for {url}")]
    Upstream { status: u16, url: String },

    #[error("Download from {url} exceeds {limit} bytes")]
    DownloadTooLarge { url: String, limit: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LimiterError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            LimiterError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LimiterError::InvalidPolicy { .. } => StatusCode::BAD_REQUEST,
            LimiterError::UnknownCategory(_) => StatusCode::NOT_FOUND,
            LimiterError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            LimiterError::UpstreamThrottled { .. } => StatusCode::TOO_MANY_REQUESTS,
            LimiterError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            LimiterError::DownloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            LimiterError::Http(_) => StatusCode::BAD_GATEWAY,
            LimiterError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LimiterError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for LimiterError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
