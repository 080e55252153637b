use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::core::errors::ApiError;
use crate::rag::RetrievalQuery;
use crate::server::extract::ApiJson;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    #[serde(flatten)]
    pub retrieval: RetrievalQuery,
    pub generation_model: String,
}

/// Retrieve, assemble the prompt, generate.
pub async fn ask(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<AskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let question = request.retrieval.text.clone();
    let docs = state.retriever.retrieve(request.retrieval).await?;

    let context = state.context_builder.format_context(&docs);
    let prompt = state.context_builder.format_prompt(&context, &question);
    debug!("Prompt assembled from {} chunks ({} chars)", docs.len(), prompt.len());

    let answer = state
        .generation
        .generate(&prompt, &request.generation_model)
        .await?;
    Ok(Json(json!({ "answer": answer, "docs": docs, "status_code": 200 })))
}
