use thiserror::Error;

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("Invalid configuration: {0}")]
    Config(#[source] anyhow::Error),

    #[error("Failed to initialize embedding provider: {0}")]
    Embedding(#[source] anyhow::Error),

    #[error("Failed to initialize log storage: {0}")]
    LogStorage(#[source] anyhow::Error),

    #[error("Failed to initialize key store: {0}")]
    KeyStore(#[source] anyhow::Error),
}
