use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::index::VectorIndex;
use super::store::{DistanceMetric, DocumentChunk, SearchMode, VectorCollection};
use crate::core::config::{EmbeddingSettings, RetrievalSettings, EPHEMERAL_COLLECTION};
use crate::core::errors::ApiError;

pub const NO_SOURCE_MESSAGE: &str = "no documents or existing vector store provided.";

/// One retrieval request. Inline `documents` win over `existing_collection`.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalQuery {
    #[serde(rename = "query")]
    pub text: String,
    #[serde(default)]
    pub documents: Option<Vec<DocumentChunk>>,
    #[serde(default)]
    pub existing_collection: Option<String>,
    #[serde(default, alias = "existing_qdrant_path")]
    pub existing_storage_path: Option<PathBuf>,
    #[serde(default)]
    pub embedding_model: String,
    /// Falls back to the configured default when absent.
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default)]
    pub search_mode: SearchMode,
}

impl RetrievalQuery {
    pub fn new(text: impl Into<String>, embedding_model: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            documents: None,
            existing_collection: None,
            existing_storage_path: None,
            embedding_model: embedding_model.into(),
            k: None,
            search_mode: SearchMode::default(),
        }
    }

    pub fn with_documents(mut self, documents: Vec<DocumentChunk>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn with_collection(mut self, name: impl Into<String>, path: Option<PathBuf>) -> Self {
        self.existing_collection = Some(name.into());
        self.existing_storage_path = path;
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.search_mode = mode;
        self
    }
}

#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    pub default_store_dir: PathBuf,
    pub ephemeral_store_dir: PathBuf,
    pub ephemeral_collection: String,
    pub distance: DistanceMetric,
    pub default_k: usize,
    /// Replaces every request's `embedding_model` when set.
    pub embedding_override: Option<String>,
}

impl RetrieverConfig {
    pub fn from_settings(retrieval: &RetrievalSettings, embedding: &EmbeddingSettings) -> Self {
        Self {
            default_store_dir: retrieval
                .vector_store_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from("data/vector_stores")),
            ephemeral_store_dir: retrieval
                .ephemeral_store_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from("data/ephemeral")),
            ephemeral_collection: retrieval.ephemeral_collection.clone(),
            distance: retrieval.distance,
            default_k: retrieval.default_k,
            embedding_override: embedding
                .model_override
                .clone()
                .filter(|model| !model.trim().is_empty()),
        }
    }
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self::from_settings(&RetrievalSettings::default(), &EmbeddingSettings::default())
    }
}

/// Single entry point for retrieval over ephemeral or durable collections.
pub struct Retriever {
    index: Arc<VectorIndex>,
    config: RetrieverConfig,
    /// Held across ephemeral build and search.
    ephemeral_lock: Mutex<()>,
}

impl Retriever {
    pub fn new(index: Arc<VectorIndex>, config: RetrieverConfig) -> Self {
        Self {
            index,
            config,
            ephemeral_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    pub async fn retrieve(&self, query: RetrievalQuery) -> Result<Vec<DocumentChunk>, ApiError> {
        if query.text.trim().is_empty() {
            return Err(ApiError::InvalidQuery("query must not be empty".to_string()));
        }
        let k = query.k.unwrap_or(self.config.default_k);
        if k == 0 {
            return Err(ApiError::InvalidQuery("k must be at least 1".to_string()));
        }
        let model = self.embedding_model(&query.embedding_model)?;

        if let Some(documents) = query.documents.filter(|docs| !docs.is_empty()) {
            let scratch = VectorCollection::ephemeral(
                self.config.ephemeral_collection.clone(),
                self.config.ephemeral_store_dir.clone(),
            )
            .with_distance(self.config.distance);

            let _guard = self.ephemeral_lock.lock().await;
            self.index.build(documents, &scratch, &model).await?;
            let handle = self.index.load(&scratch).await?;
            let query_vector = self.index.embed_query(&model, &query.text).await?;
            return handle.search(&query_vector, k, query.search_mode).await;
        }

        let name = query
            .existing_collection
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| ApiError::InvalidQuery(NO_SOURCE_MESSAGE.to_string()))?;
        let location = query
            .existing_storage_path
            .unwrap_or_else(|| self.config.default_store_dir.clone());
        let collection = VectorCollection::durable(name, location);

        let handle = self.index.load(&collection).await?;
        if handle.info().embedding_model != model {
            warn!(
                "Collection {} was built with '{}' but is queried with '{}'",
                collection.display(),
                handle.info().embedding_model,
                model
            );
        }
        let query_vector = self.index.embed_query(&model, &query.text).await?;
        debug!("Searching {} (k={})", collection.display(), k);
        handle.search(&query_vector, k, query.search_mode).await
    }

    /// Appends `documents` to a durable collection.
    pub async fn ingest(
        &self,
        name: &str,
        storage_path: Option<PathBuf>,
        documents: Vec<DocumentChunk>,
        embedding_model: &str,
    ) -> Result<(VectorCollection, usize), ApiError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::InvalidQuery("collection name must not be empty".to_string()));
        }
        if name == self.config.ephemeral_collection || name == EPHEMERAL_COLLECTION {
            return Err(ApiError::InvalidQuery(format!(
                "'{}' is reserved for inline documents",
                name
            )));
        }
        if documents.is_empty() {
            return Err(ApiError::InvalidQuery("documents must not be empty".to_string()));
        }
        let model = self.embedding_model(embedding_model)?;
        let location = storage_path.unwrap_or_else(|| self.config.default_store_dir.clone());
        let collection =
            VectorCollection::durable(name, location).with_distance(self.config.distance);

        let indexed = self.index.build(documents, &collection, &model).await?;
        Ok((collection, indexed))
    }

    fn embedding_model(&self, requested: &str) -> Result<String, ApiError> {
        if let Some(model) = &self.config.embedding_override {
            return Ok(model.clone());
        }
        if requested.trim().is_empty() {
            return Err(ApiError::InvalidQuery("embedding_model is required".to_string()));
        }
        Ok(requested.to_string())
    }
}
