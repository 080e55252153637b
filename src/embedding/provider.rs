use async_trait::async_trait;

use crate::core::errors::ApiError;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// short provider name used in logs
    fn name(&self) -> &str;

    /// embed a batch of texts; one vector per input, in input order
    async fn embed(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError>;

    /// embed a single query text
    async fn embed_query(&self, model: &str, text: &str) -> Result<Vec<f32>, ApiError> {
        let mut vectors = self.embed(model, &[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| ApiError::Embedding("provider returned no vector".to_string()))
    }
}
