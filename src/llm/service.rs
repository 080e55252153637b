use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::cache::GenerationModelCache;
use super::types::{GenerationParameters, Quantization};
use crate::core::config::GenerationSettings;
use crate::core::errors::ApiError;

/// Prompt in, generated text out. No retries at this layer.
#[derive(Clone)]
pub struct GenerationService {
    cache: Arc<GenerationModelCache>,
    quantization: Quantization,
    parameters: GenerationParameters,
    timeout: Duration,
}

impl GenerationService {
    pub fn new(cache: Arc<GenerationModelCache>, settings: &GenerationSettings) -> Self {
        Self {
            cache,
            quantization: settings.quantization,
            parameters: GenerationParameters::from_settings(settings),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn generate(&self, prompt: &str, model_identifier: &str) -> Result<String, ApiError> {
        if model_identifier.trim().is_empty() {
            return Err(ApiError::BadRequest("generation_model is required".to_string()));
        }

        let handle = self
            .cache
            .get_or_load(model_identifier, self.quantization, &self.parameters)
            .await?;

        let output = tokio::time::timeout(self.timeout, handle.infer(prompt))
            .await
            .map_err(|_| {
                ApiError::Timeout(format!(
                    "generation with {} exceeded {}s",
                    model_identifier,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|err| match err {
                ApiError::Generation(_) | ApiError::Timeout(_) => err,
                other => ApiError::generation(other),
            })?;

        debug!("Generated {} chars with {}", output.len(), model_identifier);
        Ok(strip_prompt_echo(prompt, &output))
    }
}

/// Drops a leading copy of the prompt and surrounding whitespace.
pub fn strip_prompt_echo(prompt: &str, output: &str) -> String {
    output
        .strip_prefix(prompt)
        .unwrap_or(output)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::cache::tests::CountingLoader;
    use crate::llm::cache::ModelLoader;
    use crate::llm::types::InferenceEngine;
    use async_trait::async_trait;

    fn service_with(loader: Arc<dyn ModelLoader>) -> GenerationService {
        let cache = Arc::new(GenerationModelCache::new(loader));
        GenerationService::new(cache, &GenerationSettings::default())
    }

    #[tokio::test]
    async fn says_hi_without_echo() {
        let service = service_with(Arc::new(CountingLoader::new()));
        let answer = service.generate("Say hi", "stub").await.unwrap();
        assert_eq!(answer, "hi");
    }

    #[test]
    fn echo_is_only_stripped_as_prefix() {
        assert_eq!(strip_prompt_echo("Q?", "Q? A."), "A.");
        assert_eq!(strip_prompt_echo("Q?", "  A. Q?"), "A. Q?");
    }

    struct SlowEngine;

    #[async_trait]
    impl InferenceEngine for SlowEngine {
        async fn infer(&self, _prompt: &str, _params: &GenerationParameters) -> Result<String, ApiError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("late".to_string())
        }
    }

    struct SlowLoader;

    #[async_trait]
    impl ModelLoader for SlowLoader {
        async fn load(
            &self,
            _model_identifier: &str,
            _quantization: Quantization,
            _parameters: &GenerationParameters,
        ) -> Result<Arc<dyn InferenceEngine>, ApiError> {
            Ok(Arc::new(SlowEngine))
        }
    }

    #[tokio::test]
    async fn inference_is_bounded_by_timeout() {
        let service =
            service_with(Arc::new(SlowLoader)).with_timeout(Duration::from_millis(50));
        let err = service.generate("Say hi", "slow").await.unwrap_err();
        assert!(matches!(err, ApiError::Timeout(_)));
    }

    #[tokio::test]
    async fn load_failure_is_generation_error() {
        let loader = CountingLoader {
            failures: 5,
            ..CountingLoader::new()
        };
        let service = service_with(Arc::new(loader));
        let err = service.generate("Say hi", "broken").await.unwrap_err();
        assert!(matches!(err, ApiError::Generation(msg) if msg.contains("out of memory")));
    }
}
