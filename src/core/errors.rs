use axum::extract::rejection::JsonRejection;
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("service unavailable")]
    ServiceUnavailable,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidQuery(String),
    #[error("collection not found: {0}")]
    CollectionNotFound(String),
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("bad gateway: {0}")]
    Relay(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Internal(err.to_string())
    }

    pub fn embedding<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Embedding(err.to_string())
    }

    pub fn generation<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Generation(err.to_string())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::BadRequest(_)
            | ApiError::InvalidQuery(_)
            | ApiError::DimensionMismatch { .. } => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) | ApiError::CollectionNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Embedding(_) | ApiError::Generation(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Relay(_) => StatusCode::BAD_GATEWAY,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let message = match &self {
            ApiError::Unauthorized => "Unauthorized".to_string(),
            ApiError::ServiceUnavailable => "Service unavailable".to_string(),
            ApiError::BadRequest(msg) | ApiError::NotFound(msg) | ApiError::InvalidQuery(msg) => {
                msg.clone()
            }
            ApiError::Timeout(_) => "Gateway timeout".to_string(),
            ApiError::Relay(msg) => format!("Bad gateway: {}", msg),
            other => other.to_string(),
        };

        let body = Json(json!({ "error": message, "status_code": status.as_u16() }));
        (status, body).into_response()
    }
}
