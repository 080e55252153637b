use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::config::GenerationSettings;
use crate::core::errors::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Quantization {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "8bit")]
    EightBit,
    #[default]
    #[serde(rename = "4bit")]
    FourBit,
}

impl Quantization {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quantization::None => "none",
            Quantization::EightBit => "8bit",
            Quantization::FourBit => "4bit",
        }
    }

    /// GGUF file-name tag of the weights for this variant.
    pub fn gguf_tag(&self) -> &'static str {
        match self {
            Quantization::None => "F16",
            Quantization::EightBit => "Q8_0",
            Quantization::FourBit => "Q4_K_M",
        }
    }
}

impl fmt::Display for Quantization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    pub max_new_tokens: u32,
    pub temperature: f32,
    /// Greedy decoding when false.
    pub do_sample: bool,
    pub n_ctx: usize,
    pub n_gpu_layers: i32,
}

impl GenerationParameters {
    pub fn from_settings(settings: &GenerationSettings) -> Self {
        Self {
            max_new_tokens: settings.max_new_tokens,
            temperature: settings.temperature,
            do_sample: settings.do_sample,
            n_ctx: settings.n_ctx,
            n_gpu_layers: settings.n_gpu_layers,
        }
    }
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self::from_settings(&GenerationSettings::default())
    }
}

/// Prompt in, text out. Implementations may echo the prompt.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    async fn infer(&self, prompt: &str, params: &GenerationParameters) -> Result<String, ApiError>;
}

/// A loaded model, shared by every request for its identifier.
#[derive(Clone)]
pub struct ModelHandle {
    pub model_identifier: String,
    pub quantization: Quantization,
    pub parameters: GenerationParameters,
    engine: Arc<dyn InferenceEngine>,
}

impl ModelHandle {
    pub fn new(
        model_identifier: impl Into<String>,
        quantization: Quantization,
        parameters: GenerationParameters,
        engine: Arc<dyn InferenceEngine>,
    ) -> Self {
        Self {
            model_identifier: model_identifier.into(),
            quantization,
            parameters,
            engine,
        }
    }

    pub async fn infer(&self, prompt: &str) -> Result<String, ApiError> {
        self.engine.infer(prompt, &self.parameters).await
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("model_identifier", &self.model_identifier)
            .field("quantization", &self.quantization)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}
