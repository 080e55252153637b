pub mod cache;
pub mod llama_service;
pub mod service;
pub mod types;

pub use cache::{GenerationModelCache, ModelLoader};
pub use llama_service::LlamaServerLoader;
pub use service::GenerationService;
pub use types::{GenerationParameters, InferenceEngine, ModelHandle, Quantization};
