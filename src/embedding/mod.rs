pub mod openai;
pub mod provider;

pub use openai::OpenAiEmbeddingProvider;
pub use provider::EmbeddingProvider;
