//! Embeds chunks into collections and answers nearest / diverse-neighbor queries.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use super::mmr::{mmr_rerank, MmrCandidate};
use super::sqlite::StoreRegistry;
use super::store::{
    CollectionInfo, CollectionKind, DocumentChunk, IndexedVector, SearchMode, VectorCollection,
    VectorStore,
};
use crate::core::errors::ApiError;
use crate::embedding::EmbeddingProvider;
use crate::vector_math;

#[derive(Debug, Clone, Copy)]
pub struct IndexConfig {
    /// λ stored on collections created by this index.
    pub mmr_lambda: f32,
    /// Candidates considered by diversity search before re-ranking.
    pub fetch_k: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            mmr_lambda: 0.5,
            fetch_k: 20,
        }
    }
}

pub struct VectorIndex {
    embedder: Arc<dyn EmbeddingProvider>,
    stores: StoreRegistry,
    config: IndexConfig,
}

impl VectorIndex {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, config: IndexConfig) -> Self {
        Self {
            embedder,
            stores: StoreRegistry::new(),
            config,
        }
    }

    pub fn config(&self) -> IndexConfig {
        self.config
    }

    pub async fn embed_query(&self, model: &str, text: &str) -> Result<Vec<f32>, ApiError> {
        self.embedder.embed_query(model, text).await
    }

    /// Embeds `chunks` and stores them in `collection`.
    ///
    /// Ephemeral collections are replaced wholesale. Durable collections are
    /// appended to; the first build fixes their embedding model and dimension.
    pub async fn build(
        &self,
        chunks: Vec<DocumentChunk>,
        collection: &VectorCollection,
        embedding_model: &str,
    ) -> Result<usize, ApiError> {
        let contents: Vec<String> = chunks.iter().map(|chunk| chunk.content.clone()).collect();
        let embeddings = self.embedder.embed(embedding_model, &contents).await?;
        if embeddings.len() != chunks.len() {
            return Err(ApiError::Embedding(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                embeddings.len()
            )));
        }

        let items: Vec<IndexedVector> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(payload, embedding)| IndexedVector {
                id: Uuid::new_v4().to_string(),
                embedding,
                payload,
            })
            .collect();

        let info = CollectionInfo {
            name: collection.name.clone(),
            embedding_model: embedding_model.to_string(),
            dimension: items.first().map(|item| item.embedding.len()),
            distance: collection.distance,
            mmr_lambda: self.config.mmr_lambda,
        };

        let store = self.stores.open_or_create(&collection.location).await?;
        let stored = match collection.kind {
            CollectionKind::Ephemeral => store.replace_collection(&info, items).await?,
            CollectionKind::Durable => store.append_to_collection(&info, items).await?,
        };

        info!(
            "Indexed {} chunks into {} ({:?})",
            stored,
            collection.display(),
            collection.kind
        );
        Ok(stored)
    }

    /// Attaches to an existing collection. Never creates anything on disk.
    pub async fn load(&self, collection: &VectorCollection) -> Result<CollectionHandle, ApiError> {
        let store = self.stores.open_existing(&collection.location).await?;
        let info = store
            .collection(&collection.name)
            .await?
            .ok_or_else(|| ApiError::CollectionNotFound(collection.display()))?;

        Ok(CollectionHandle {
            store,
            info,
            fetch_k: self.config.fetch_k,
        })
    }
}

/// A loaded collection ready for search.
pub struct CollectionHandle {
    store: Arc<dyn VectorStore>,
    info: CollectionInfo,
    fetch_k: usize,
}

impl CollectionHandle {
    pub fn info(&self) -> &CollectionInfo {
        &self.info
    }

    pub async fn count(&self) -> Result<usize, ApiError> {
        self.store.count(&self.info.name).await
    }

    /// Returns at most `k` chunks.
    ///
    /// Similarity mode orders by relevance, ties in insertion order. Diversity
    /// mode re-ranks the top `max(fetch_k, k)` candidates with MMR.
    pub async fn search(
        &self,
        query_vector: &[f32],
        k: usize,
        mode: SearchMode,
    ) -> Result<Vec<DocumentChunk>, ApiError> {
        if let Some(expected) = self.info.dimension {
            if expected != query_vector.len() {
                return Err(ApiError::DimensionMismatch {
                    expected,
                    actual: query_vector.len(),
                });
            }
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut vectors = self.store.vectors(&self.info.name).await?;
        if vectors.is_empty() {
            return Ok(Vec::new());
        }

        let mut scores = Vec::with_capacity(vectors.len());
        for (idx, vector) in vectors.iter().enumerate() {
            let relevance = self.info.distance.relevance(query_vector, &vector.embedding)?;
            scores.push((idx, relevance));
        }
        vector_math::sort_descending(&mut scores);

        let picked: Vec<usize> = match mode {
            SearchMode::Similarity => scores.iter().take(k).map(|(idx, _)| *idx).collect(),
            SearchMode::Diversity => {
                let candidates: Vec<MmrCandidate> = scores
                    .iter()
                    .take(self.fetch_k.max(k))
                    .map(|(idx, relevance)| MmrCandidate {
                        index: *idx,
                        relevance: *relevance,
                        vector: vectors[*idx].embedding.clone(),
                    })
                    .collect();
                mmr_rerank(&candidates, k, self.info.mmr_lambda)
            }
        };

        Ok(picked
            .into_iter()
            .map(|idx| std::mem::replace(&mut vectors[idx].payload, DocumentChunk::new("")))
            .collect())
    }
}
