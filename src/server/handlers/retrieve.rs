use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::rag::RetrievalQuery;
use crate::server::extract::ApiJson;
use crate::state::AppState;

pub async fn retrieve(
    State(state): State<Arc<AppState>>,
    ApiJson(query): ApiJson<RetrievalQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let docs = state.retriever.retrieve(query).await?;
    Ok(Json(json!({ "docs": docs, "status_code": 200 })))
}
