use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::server::extract::ApiJson;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    pub generation_model: String,
}

pub async fn generate(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<GenerateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let answer = state
        .generation
        .generate(&request.prompt, &request.generation_model)
        .await?;
    Ok(Json(json!({ "answer": answer, "status_code": 200 })))
}
