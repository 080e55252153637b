use axum::http::{header::AUTHORIZATION, HeaderMap};

use crate::core::errors::ApiError;

const BEARER_PREFIX: &str = "bearer ";

/// Token of an `Authorization: Bearer <token>` header, if present and well-formed.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    if value.len() <= BEARER_PREFIX.len()
        || !value[..BEARER_PREFIX.len()].eq_ignore_ascii_case(BEARER_PREFIX)
    {
        return None;
    }
    let token = value[BEARER_PREFIX.len()..].trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

pub fn require_bearer(headers: &HeaderMap) -> Result<&str, ApiError> {
    bearer_token(headers).ok_or(ApiError::Unauthorized)
}

/// New random API key: 32 bytes, hex encoded.
pub fn generate_api_key() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}
