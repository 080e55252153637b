//! VectorStore trait — abstract interface for collection storage backends.
//!
//! The primary implementation is `SqliteVectorStore` in the `sqlite` module.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::errors::ApiError;
use crate::vector_math;

pub type Metadata = Map<String, Value>;

/// A unit of retrievable text. Never mutated once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl DocumentChunk {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// A stored chunk together with its embedding.
#[derive(Debug, Clone)]
pub struct IndexedVector {
    pub id: String,
    pub embedding: Vec<f32>,
    pub payload: DocumentChunk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Dot,
    Euclidean,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Dot => "dot",
            DistanceMetric::Euclidean => "euclidean",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "cosine" => Some(DistanceMetric::Cosine),
            "dot" => Some(DistanceMetric::Dot),
            "euclidean" => Some(DistanceMetric::Euclidean),
            _ => None,
        }
    }

    /// Relevance of `candidate` to `query`; higher is closer for every metric.
    pub fn relevance(&self, query: &[f32], candidate: &[f32]) -> Result<f32, ApiError> {
        match self {
            DistanceMetric::Cosine => vector_math::cosine_similarity(query, candidate),
            DistanceMetric::Dot => vector_math::dot(query, candidate),
            DistanceMetric::Euclidean => {
                let distance = vector_math::euclidean_distance(query, candidate)?;
                Ok(1.0 / (1.0 + distance))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Similarity,
    /// Maximal marginal relevance.
    #[default]
    #[serde(alias = "mmr")]
    Diversity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    Durable,
    /// Dropped and rebuilt on every use.
    Ephemeral,
}

/// Reference to a collection: a name within a storage location.
#[derive(Debug, Clone)]
pub struct VectorCollection {
    pub name: String,
    pub location: PathBuf,
    pub distance: DistanceMetric,
    pub kind: CollectionKind,
}

impl VectorCollection {
    pub fn durable(name: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            distance: DistanceMetric::default(),
            kind: CollectionKind::Durable,
        }
    }

    pub fn ephemeral(name: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            distance: DistanceMetric::default(),
            kind: CollectionKind::Ephemeral,
        }
    }

    pub fn with_distance(mut self, distance: DistanceMetric) -> Self {
        self.distance = distance;
        self
    }

    pub fn display(&self) -> String {
        format!("{}@{}", self.name, self.location.display())
    }
}

/// Persisted description of a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInfo {
    pub name: String,
    pub embedding_model: String,
    /// Unset until the first vector is stored.
    pub dimension: Option<usize>,
    pub distance: DistanceMetric,
    pub mmr_lambda: f32,
}

/// Abstract trait for collection storage backends.
///
/// One store serves every collection under a single storage location.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn collection(&self, name: &str) -> Result<Option<CollectionInfo>, ApiError>;

    /// Drops `info.name` and recreates it holding exactly `items`, atomically.
    async fn replace_collection(
        &self,
        info: &CollectionInfo,
        items: Vec<IndexedVector>,
    ) -> Result<usize, ApiError>;

    /// Creates the collection if missing, then appends `items`.
    ///
    /// Fails with `DimensionMismatch` when `items` disagree with the stored dimension.
    async fn append_to_collection(
        &self,
        info: &CollectionInfo,
        items: Vec<IndexedVector>,
    ) -> Result<usize, ApiError>;

    /// All vectors of a collection in insertion order.
    async fn vectors(&self, name: &str) -> Result<Vec<IndexedVector>, ApiError>;

    async fn count(&self, name: &str) -> Result<usize, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relevance_is_higher_when_closer() {
        let query = [1.0, 0.0];
        let near = [0.9, 0.1];
        let far = [0.0, 1.0];
        for metric in [DistanceMetric::Cosine, DistanceMetric::Dot, DistanceMetric::Euclidean] {
            let near_score = metric.relevance(&query, &near).unwrap();
            let far_score = metric.relevance(&query, &far).unwrap();
            assert!(near_score > far_score, "{}", metric.as_str());
        }
        assert_eq!(DistanceMetric::Euclidean.relevance(&query, &query).unwrap(), 1.0);
    }

    #[test]
    fn search_mode_accepts_mmr_alias() {
        let mode: SearchMode = serde_json::from_str("\"mmr\"").unwrap();
        assert_eq!(mode, SearchMode::Diversity);
        assert_eq!(SearchMode::default(), SearchMode::Diversity);
        assert_eq!(DistanceMetric::parse("dot"), Some(DistanceMetric::Dot));
        assert_eq!(DistanceMetric::parse("manhattan"), None);
    }
}
