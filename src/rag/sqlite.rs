//! SQLite-backed vector store implementation.
//!
//! One `vectors.db` per storage location holds every collection stored there.
//! Search is brute-force over the collection's vectors (see `index`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tokio::sync::Mutex;

use super::store::{CollectionInfo, DistanceMetric, IndexedVector, Metadata, VectorStore};
use crate::core::errors::ApiError;

pub const DB_FILE_NAME: &str = "vectors.db";

pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    /// Opens the store under `location`, creating the directory and database.
    pub async fn create(location: &Path) -> Result<Self, ApiError> {
        tokio::fs::create_dir_all(location)
            .await
            .map_err(ApiError::internal)?;
        Self::connect(location, true).await
    }

    /// Opens an existing store; never creates files.
    pub async fn open_existing(location: &Path) -> Result<Self, ApiError> {
        if !location.join(DB_FILE_NAME).is_file() {
            return Err(ApiError::CollectionNotFound(format!(
                "no vector store at {}",
                location.display()
            )));
        }
        Self::connect(location, false).await
    }

    async fn connect(location: &Path, create: bool) -> Result<Self, ApiError> {
        let options = SqliteConnectOptions::new()
            .filename(location.join(DB_FILE_NAME))
            .create_if_missing(create)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(ApiError::internal)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                embedding_model TEXT NOT NULL,
                dimension INTEGER,
                distance TEXT NOT NULL DEFAULT 'cosine',
                mmr_lambda REAL NOT NULL DEFAULT 0.5,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS vectors (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                collection TEXT NOT NULL REFERENCES collections(name) ON DELETE CASCADE,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                embedding BLOB NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_vectors_collection ON vectors(collection, seq)")
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(())
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    fn row_to_info(row: &sqlx::sqlite::SqliteRow) -> CollectionInfo {
        let distance: String = row.get("distance");
        let dimension: Option<i64> = row.get("dimension");
        let mmr_lambda: f64 = row.get("mmr_lambda");

        CollectionInfo {
            name: row.get("name"),
            embedding_model: row.get("embedding_model"),
            dimension: dimension.map(|d| d as usize),
            distance: DistanceMetric::parse(&distance).unwrap_or_default(),
            mmr_lambda: mmr_lambda as f32,
        }
    }

    fn row_to_vector(row: &sqlx::sqlite::SqliteRow) -> IndexedVector {
        let metadata_str: String = row.get("metadata");
        let metadata = serde_json::from_str::<Metadata>(&metadata_str).unwrap_or_default();
        let embedding_bytes: Vec<u8> = row.get("embedding");

        IndexedVector {
            id: row.get("id"),
            embedding: Self::deserialize_embedding(&embedding_bytes),
            payload: super::store::DocumentChunk {
                content: row.get("content"),
                metadata,
            },
        }
    }

    fn uniform_dimension(items: &[IndexedVector]) -> Result<Option<usize>, ApiError> {
        let Some(first) = items.first() else {
            return Ok(None);
        };
        let expected = first.embedding.len();
        if let Some(bad) = items.iter().find(|item| item.embedding.len() != expected) {
            return Err(ApiError::DimensionMismatch {
                expected,
                actual: bad.embedding.len(),
            });
        }
        Ok(Some(expected))
    }

    async fn insert_collection_row(
        tx: &mut Transaction<'_, Sqlite>,
        info: &CollectionInfo,
        dimension: Option<usize>,
    ) -> Result<(), ApiError> {
        sqlx::query(
            "INSERT INTO collections (name, embedding_model, dimension, distance, mmr_lambda)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&info.name)
        .bind(&info.embedding_model)
        .bind(dimension.map(|d| d as i64))
        .bind(info.distance.as_str())
        .bind(info.mmr_lambda as f64)
        .execute(&mut **tx)
        .await
        .map_err(ApiError::internal)?;
        Ok(())
    }

    async fn insert_vectors(
        tx: &mut Transaction<'_, Sqlite>,
        collection: &str,
        items: &[IndexedVector],
    ) -> Result<(), ApiError> {
        for item in items {
            let metadata_str =
                serde_json::to_string(&item.payload.metadata).map_err(ApiError::internal)?;
            sqlx::query(
                "INSERT INTO vectors (id, collection, content, metadata, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(&item.id)
            .bind(collection)
            .bind(&item.payload.content)
            .bind(&metadata_str)
            .bind(Self::serialize_embedding(&item.embedding))
            .execute(&mut **tx)
            .await
            .map_err(ApiError::internal)?;
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn collection(&self, name: &str) -> Result<Option<CollectionInfo>, ApiError> {
        let row = sqlx::query(
            "SELECT name, embedding_model, dimension, distance, mmr_lambda
             FROM collections
             WHERE name = ?1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(row.as_ref().map(Self::row_to_info))
    }

    async fn replace_collection(
        &self,
        info: &CollectionInfo,
        items: Vec<IndexedVector>,
    ) -> Result<usize, ApiError> {
        let dimension = Self::uniform_dimension(&items)?;
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        sqlx::query("DELETE FROM vectors WHERE collection = ?1")
            .bind(&info.name)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        sqlx::query("DELETE FROM collections WHERE name = ?1")
            .bind(&info.name)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        Self::insert_collection_row(&mut tx, info, dimension).await?;
        Self::insert_vectors(&mut tx, &info.name, &items).await?;

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(items.len())
    }

    async fn append_to_collection(
        &self,
        info: &CollectionInfo,
        items: Vec<IndexedVector>,
    ) -> Result<usize, ApiError> {
        let dimension = Self::uniform_dimension(&items)?;
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        let existing = sqlx::query(
            "SELECT name, embedding_model, dimension, distance, mmr_lambda
             FROM collections
             WHERE name = ?1",
        )
        .bind(&info.name)
        .fetch_optional(&mut *tx)
        .await
        .map_err(ApiError::internal)?
        .as_ref()
        .map(Self::row_to_info);

        match existing {
            None => Self::insert_collection_row(&mut tx, info, dimension).await?,
            Some(current) => match (current.dimension, dimension) {
                (Some(expected), Some(actual)) if expected != actual => {
                    return Err(ApiError::DimensionMismatch { expected, actual });
                }
                (None, Some(actual)) => {
                    sqlx::query("UPDATE collections SET dimension = ?1 WHERE name = ?2")
                        .bind(actual as i64)
                        .bind(&info.name)
                        .execute(&mut *tx)
                        .await
                        .map_err(ApiError::internal)?;
                }
                _ => {}
            },
        }

        Self::insert_vectors(&mut tx, &info.name, &items).await?;
        tx.commit().await.map_err(ApiError::internal)?;
        Ok(items.len())
    }

    async fn vectors(&self, name: &str) -> Result<Vec<IndexedVector>, ApiError> {
        let rows = sqlx::query(
            "SELECT id, content, metadata, embedding
             FROM vectors
             WHERE collection = ?1
             ORDER BY seq ASC",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(rows.iter().map(Self::row_to_vector).collect())
    }

    async fn count(&self, name: &str) -> Result<usize, ApiError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors WHERE collection = ?1")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(count as usize)
    }
}

/// Open stores keyed by canonical location, shared across requests.
#[derive(Default)]
pub struct StoreRegistry {
    stores: Mutex<HashMap<PathBuf, Arc<SqliteVectorStore>>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the store at `location`, creating it on first use.
    pub async fn open_or_create(&self, location: &Path) -> Result<Arc<SqliteVectorStore>, ApiError> {
        tokio::fs::create_dir_all(location)
            .await
            .map_err(ApiError::internal)?;
        let key = tokio::fs::canonicalize(location)
            .await
            .map_err(ApiError::internal)?;

        let mut stores = self.stores.lock().await;
        if let Some(store) = stores.get(&key) {
            return Ok(store.clone());
        }
        let store = Arc::new(SqliteVectorStore::connect(&key, true).await?);
        stores.insert(key, store.clone());
        Ok(store)
    }

    /// Returns the store at `location` only if it already exists on disk.
    pub async fn open_existing(&self, location: &Path) -> Result<Arc<SqliteVectorStore>, ApiError> {
        let Ok(key) = tokio::fs::canonicalize(location).await else {
            return Err(ApiError::CollectionNotFound(format!(
                "no vector store at {}",
                location.display()
            )));
        };

        let mut stores = self.stores.lock().await;
        if let Some(store) = stores.get(&key) {
            return Ok(store.clone());
        }
        let store = Arc::new(SqliteVectorStore::open_existing(&key).await?);
        stores.insert(key, store.clone());
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::store::DocumentChunk;

    fn info(name: &str) -> CollectionInfo {
        CollectionInfo {
            name: name.to_string(),
            embedding_model: "test-embed".to_string(),
            dimension: None,
            distance: DistanceMetric::Cosine,
            mmr_lambda: 0.5,
        }
    }

    fn vector(id: &str, content: &str, embedding: Vec<f32>) -> IndexedVector {
        IndexedVector {
            id: id.to_string(),
            embedding,
            payload: DocumentChunk::new(content).with_metadata("source", "test"),
        }
    }

    #[tokio::test]
    async fn open_existing_refuses_to_create() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("nowhere");

        let result = SqliteVectorStore::open_existing(&missing).await;

        assert!(matches!(result, Err(ApiError::CollectionNotFound(_))));
        assert!(!missing.exists());
    }

    #[tokio::test]
    async fn append_preserves_insertion_order_and_metadata() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SqliteVectorStore::create(tmp.path()).await.unwrap();

        store
            .append_to_collection(&info("docs"), vec![vector("a", "first", vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .append_to_collection(&info("docs"), vec![vector("b", "second", vec![0.0, 1.0])])
            .await
            .unwrap();

        let stored = store.vectors("docs").await.unwrap();
        let ids: Vec<&str> = stored.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(stored[0].payload.metadata["source"], "test");
        assert_eq!(stored[1].embedding, vec![0.0, 1.0]);

        let collection = store.collection("docs").await.unwrap().unwrap();
        assert_eq!(collection.dimension, Some(2));
        assert_eq!(collection.embedding_model, "test-embed");
    }

    #[tokio::test]
    async fn append_rejects_dimension_change() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SqliteVectorStore::create(tmp.path()).await.unwrap();

        store
            .append_to_collection(&info("docs"), vec![vector("a", "x", vec![1.0, 0.0])])
            .await
            .unwrap();
        let result = store
            .append_to_collection(&info("docs"), vec![vector("b", "y", vec![1.0, 0.0, 0.0])])
            .await;

        assert!(matches!(
            result,
            Err(ApiError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
        assert_eq!(store.count("docs").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn replace_drops_previous_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SqliteVectorStore::create(tmp.path()).await.unwrap();

        store
            .replace_collection(
                &info("scratch"),
                vec![vector("a1", "A", vec![1.0]), vector("a2", "A2", vec![1.0])],
            )
            .await
            .unwrap();
        store
            .replace_collection(&info("scratch"), vec![vector("b1", "B", vec![1.0])])
            .await
            .unwrap();

        let stored = store.vectors("scratch").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].payload.content, "B");
    }

    #[tokio::test]
    async fn collections_are_isolated() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SqliteVectorStore::create(tmp.path()).await.unwrap();

        store
            .append_to_collection(&info("one"), vec![vector("1", "x", vec![1.0])])
            .await
            .unwrap();
        store
            .append_to_collection(&info("two"), vec![vector("2", "y", vec![1.0])])
            .await
            .unwrap();

        store
            .replace_collection(&info("one"), Vec::new())
            .await
            .unwrap();
        assert_eq!(store.count("one").await.unwrap(), 0);
        assert_eq!(store.count("two").await.unwrap(), 1);
        assert_eq!(store.vectors("two").await.unwrap()[0].payload.content, "y");
    }

    #[tokio::test]
    async fn registry_shares_one_store_per_location() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = StoreRegistry::new();

        assert!(registry.open_existing(tmp.path()).await.is_err());

        let created = registry.open_or_create(tmp.path()).await.unwrap();
        let reopened = registry.open_existing(tmp.path()).await.unwrap();
        assert!(Arc::ptr_eq(&created, &reopened));
    }
}
