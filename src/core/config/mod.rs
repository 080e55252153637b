pub mod defaults;
pub mod paths;
pub mod service;
pub mod validation;

pub use defaults::{
    AuthSettings, EmbeddingSettings, GenerationSettings, KeyStoreKind, LogStorageSettings,
    ProxySettings, RetrievalSettings, ServerSettings, Settings, StorageType,
    EPHEMERAL_COLLECTION,
};
pub use paths::AppPaths;
pub use service::ConfigService;
