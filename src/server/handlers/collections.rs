use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::rag::DocumentChunk;
use crate::server::extract::ApiJson;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CollectionRequest {
    pub name: String,
    #[serde(default, alias = "qdrant_path")]
    pub storage_path: Option<PathBuf>,
    pub documents: Vec<DocumentChunk>,
    #[serde(default)]
    pub embedding_model: String,
}

pub async fn create_collection(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<CollectionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (collection, indexed) = state
        .retriever
        .ingest(
            &request.name,
            request.storage_path,
            request.documents,
            &request.embedding_model,
        )
        .await?;

    Ok(Json(json!({
        "collection": collection.name,
        "storage_path": collection.location,
        "indexed": indexed,
        "status_code": 200,
    })))
}
