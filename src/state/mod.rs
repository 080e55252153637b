use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::auth::{AuthCache, HttpKeyStore, KeyStore, SqliteKeyStore};
use crate::core::config::validation::validate_proxy_settings;
use crate::core::config::{AppPaths, KeyStoreKind, Settings};
use crate::embedding::{EmbeddingProvider, OpenAiEmbeddingProvider};
use crate::llm::{GenerationModelCache, GenerationService, LlamaServerLoader, ModelLoader};
use crate::proxy::{log_store, DataLogger, ProxyRelay, RelayConfig};
use crate::rag::{
    ContextBuilder, ContextBuilderConfig, IndexConfig, Retriever, RetrieverConfig, VectorIndex,
};

pub mod error;

use error::InitializationError;

/// Shared state of the RAG API server.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub retriever: Arc<Retriever>,
    pub generation: GenerationService,
    pub context_builder: Arc<ContextBuilder>,
}

impl AppState {
    pub fn new(
        settings: Arc<Settings>,
        retriever: Arc<Retriever>,
        generation: GenerationService,
    ) -> Self {
        let context_builder = ContextBuilder::new(ContextBuilderConfig {
            max_context_length: settings.retrieval.max_context_chars,
            ..ContextBuilderConfig::default()
        });
        Self {
            settings,
            retriever,
            generation,
            context_builder: Arc::new(context_builder),
        }
    }

    /// Wires the embedding client, vector index, retriever and the
    /// llama-server backed generation cache from `settings`.
    pub fn initialize(
        paths: &AppPaths,
        settings: Settings,
    ) -> Result<Arc<Self>, InitializationError> {
        let embedding = &settings.embedding;
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(
            OpenAiEmbeddingProvider::new(
                &embedding.base_url,
                embedding.api_key.clone(),
                Duration::from_secs(embedding.timeout_secs),
            )
            .map_err(|e| InitializationError::Embedding(e.into()))?,
        );

        let index = Arc::new(VectorIndex::new(
            embedder,
            IndexConfig {
                mmr_lambda: settings.retrieval.mmr_lambda,
                fetch_k: settings.retrieval.fetch_k,
            },
        ));
        let retriever = Arc::new(Retriever::new(
            index,
            RetrieverConfig::from_settings(&settings.retrieval, &settings.embedding),
        ));

        let loader: Arc<dyn ModelLoader> =
            Arc::new(LlamaServerLoader::new(paths, &settings.generation));
        let cache = Arc::new(GenerationModelCache::new(loader));
        let generation = GenerationService::new(cache, &settings.generation);

        info!(
            "RAG state ready (embeddings at {}, quantization {})",
            settings.embedding.base_url, settings.generation.quantization
        );
        Ok(Arc::new(Self::new(Arc::new(settings), retriever, generation)))
    }
}

/// Shared state of the relay proxy.
#[derive(Clone)]
pub struct ProxyState {
    pub relay: ProxyRelay,
    /// `None` when authentication is disabled.
    pub auth: Option<Arc<AuthCache>>,
    pub max_body_bytes: usize,
}

impl ProxyState {
    pub fn new(relay: ProxyRelay, auth: Option<Arc<AuthCache>>, max_body_bytes: usize) -> Self {
        Self {
            relay,
            auth,
            max_body_bytes,
        }
    }

    /// Validates proxy settings, starts the log writer and, when enabled,
    /// loads the key snapshot before starting the refresh loop.
    pub async fn initialize(
        paths: &AppPaths,
        settings: &Settings,
    ) -> Result<Arc<Self>, InitializationError> {
        validate_proxy_settings(settings).map_err(|e| InitializationError::Config(e.into()))?;

        let store = log_store::from_settings(&settings.log_storage, &paths.project_root)
            .await
            .map_err(|e| InitializationError::LogStorage(e.into()))?;
        info!("Proxy logs go to {}", store.describe());
        let (logger, _writer) = DataLogger::spawn(store);

        let auth = if settings.auth.enabled {
            let key_store = open_key_store(paths, settings).await?;
            let cache = Arc::new(AuthCache::new(
                key_store,
                Duration::from_secs(settings.auth.refresh_secs),
            ));
            if let Err(err) = cache.refresh().await {
                warn!("Starting with an empty auth cache: {}", err);
            }
            let _refresh_task = cache.spawn_refresh();
            Some(cache)
        } else {
            info!("Authentication is disabled");
            None
        };

        let relay = ProxyRelay::new(RelayConfig::from_settings(&settings.proxy), logger);
        Ok(Arc::new(Self::new(
            relay,
            auth,
            settings.proxy.max_body_bytes,
        )))
    }
}

async fn open_key_store(
    paths: &AppPaths,
    settings: &Settings,
) -> Result<Arc<dyn KeyStore>, InitializationError> {
    let auth = &settings.auth;
    match auth.key_store {
        KeyStoreKind::Sqlite => {
            let db = auth
                .key_store_db
                .clone()
                .unwrap_or_else(|| paths.key_store_db.clone());
            let store = SqliteKeyStore::open(&db)
                .await
                .map_err(|e| InitializationError::KeyStore(e.into()))?;
            info!("Using SQLite key store at {}", db.display());
            Ok(Arc::new(store))
        }
        KeyStoreKind::Http => {
            let url = auth.key_store_url.clone().unwrap_or_default();
            let store = HttpKeyStore::new(
                &url,
                auth.key_store_token.clone(),
                Duration::from_secs(settings.proxy.timeout_secs),
            )
            .map_err(|e| InitializationError::KeyStore(e.into()))?;
            info!("Using remote key store at {}", url);
            Ok(Arc::new(store))
        }
    }
}
