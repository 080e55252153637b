//! RAG (Retrieval-Augmented Generation) module.
//!
//! - `VectorIndex`: embeds chunks into collections and searches them
//! - `Retriever`: single entry point over ephemeral and durable collections
//! - `ContextBuilder`: turns retrieved chunks into a generation prompt

mod context_builder;
mod index;
mod mmr;
mod retriever;
mod sqlite;
mod store;

pub use context_builder::{ContextBuilder, ContextBuilderConfig};
pub use index::{CollectionHandle, IndexConfig, VectorIndex};
pub use retriever::{RetrievalQuery, Retriever, RetrieverConfig, NO_SOURCE_MESSAGE};
pub use sqlite::{SqliteVectorStore, StoreRegistry};
pub use store::{
    CollectionInfo, CollectionKind, DistanceMetric, DocumentChunk, IndexedVector, Metadata,
    SearchMode, VectorCollection, VectorStore,
};

#[cfg(test)]
pub(crate) use index::tests::KeywordEmbedder;
