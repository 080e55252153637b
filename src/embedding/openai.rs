use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::provider::EmbeddingProvider;
use crate::core::errors::ApiError;

/// Embeddings over any OpenAI-compatible `/v1/embeddings` endpoint.
#[derive(Clone)]
pub struct OpenAiEmbeddingProvider {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl OpenAiEmbeddingProvider {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ApiError::internal)?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn embed(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/v1/embeddings", self.base_url);
        let body = json!({
            "model": model,
            "input": inputs,
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let res = request.send().await.map_err(|err| {
            if err.is_timeout() {
                ApiError::Timeout(format!("embedding request to {} timed out", url))
            } else {
                ApiError::embedding(err)
            }
        })?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Embedding(format!(
                "embedding endpoint returned {}: {}",
                status, text
            )));
        }

        let mut payload: EmbeddingsResponse = res.json().await.map_err(ApiError::embedding)?;
        if payload.data.len() != inputs.len() {
            return Err(ApiError::Embedding(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                payload.data.len()
            )));
        }

        payload.data.sort_by_key(|item| item.index.unwrap_or(usize::MAX));
        let embeddings: Vec<Vec<f32>> = payload.data.into_iter().map(|item| item.embedding).collect();

        let dimension = embeddings[0].len();
        if dimension == 0 || embeddings.iter().any(|vector| vector.len() != dimension) {
            return Err(ApiError::Embedding(
                "embedding endpoint returned vectors of inconsistent dimension".to_string(),
            ));
        }

        Ok(embeddings)
    }
}
