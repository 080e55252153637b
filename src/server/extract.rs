use axum::extract::FromRequest;

use crate::core::errors::ApiError;

/// `Json` extractor whose rejections render as `{error, status_code}`.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);
