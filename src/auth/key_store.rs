//! Backing stores for proxy API keys.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::core::errors::ApiError;
use crate::core::security::generate_api_key;

/// One user's key as held by a backing store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    pub api_key: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait KeyStore: Send + Sync {
    fn name(&self) -> &str;

    /// Full snapshot of every known key.
    async fn list_entries(&self) -> Result<Vec<KeyRecord>, ApiError>;
}

pub struct SqliteKeyStore {
    pool: SqlitePool,
}

impl SqliteKeyStore {
    pub async fn open(path: &Path) -> Result<Self, ApiError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(ApiError::internal)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .map_err(ApiError::internal)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS userkeys (
                user_id TEXT PRIMARY KEY,
                api_key TEXT NOT NULL UNIQUE,
                user_name TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;
        Ok(())
    }

    /// Registers a user with a freshly generated key. `user_id` defaults to a UUID.
    pub async fn add_user(
        &self,
        user_name: &str,
        user_id: Option<String>,
    ) -> Result<KeyRecord, ApiError> {
        let user_name = user_name.trim();
        if user_name.is_empty() {
            return Err(ApiError::BadRequest("user name must not be empty".to_string()));
        }

        let record = KeyRecord {
            user_id: user_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            user_name: user_name.to_string(),
            api_key: generate_api_key(),
            created_at: Some(Utc::now()),
        };

        let created_at = record
            .created_at
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_default();

        let result = sqlx::query(
            "INSERT INTO userkeys (user_id, api_key, user_name, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&record.user_id)
        .bind(&record.api_key)
        .bind(&record.user_name)
        .bind(created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(record),
            Err(err)
                if err
                    .as_database_error()
                    .map(|db| db.is_unique_violation())
                    .unwrap_or(false) =>
            {
                Err(ApiError::BadRequest(format!(
                    "User with ID {} already exists",
                    record.user_id
                )))
            }
            Err(err) => Err(ApiError::internal(err)),
        }
    }

    pub async fn list_users(&self) -> Result<Vec<KeyRecord>, ApiError> {
        let rows = sqlx::query(
            "SELECT user_id, api_key, user_name, created_at FROM userkeys ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(rows
            .iter()
            .map(|row| {
                let created_at: String = row.get("created_at");
                KeyRecord {
                    user_id: row.get("user_id"),
                    api_key: row.get("api_key"),
                    user_name: row.get("user_name"),
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .ok()
                        .map(|ts| ts.with_timezone(&Utc)),
                }
            })
            .collect())
    }

    pub async fn remove_user(&self, user_id: &str) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM userkeys WHERE user_id = ?1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl KeyStore for SqliteKeyStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn list_entries(&self) -> Result<Vec<KeyRecord>, ApiError> {
        self.list_users().await
    }
}

/// Remote key service returning a JSON array of `KeyRecord`.
pub struct HttpKeyStore {
    url: String,
    token: Option<String>,
    client: Client,
}

impl HttpKeyStore {
    pub fn new(url: &str, token: Option<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ApiError::internal)?;
        Ok(Self {
            url: url.to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
            client,
        })
    }
}

#[async_trait]
impl KeyStore for HttpKeyStore {
    fn name(&self) -> &str {
        "http"
    }

    async fn list_entries(&self) -> Result<Vec<KeyRecord>, ApiError> {
        let mut request = self.client.get(&self.url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let res = request.send().await.map_err(ApiError::internal)?;
        if !res.status().is_success() {
            return Err(ApiError::ServiceUnavailable);
        }
        res.json::<Vec<KeyRecord>>().await.map_err(ApiError::internal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::HeaderMap, routing::get, Json, Router};
    use serde_json::json;

    #[tokio::test]
    async fn sqlite_store_adds_lists_and_removes_users() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SqliteKeyStore::open(&tmp.path().join("userkeys.db")).await.unwrap();

        let alice = store.add_user("Alice", Some("alice".to_string())).await.unwrap();
        let bob = store.add_user("Bob", None).await.unwrap();
        assert_eq!(alice.api_key.len(), 64);
        assert_ne!(alice.api_key, bob.api_key);
        assert!(Uuid::parse_str(&bob.user_id).is_ok());

        let listed = store.list_entries().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().any(|r| r.user_id == "alice" && r.api_key == alice.api_key));

        let duplicate = store.add_user("Alice again", Some("alice".to_string())).await;
        assert!(matches!(duplicate, Err(ApiError::BadRequest(msg)) if msg.contains("already exists")));

        assert!(store.remove_user("alice").await.unwrap());
        assert!(!store.remove_user("alice").await.unwrap());
        assert_eq!(store.list_users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn http_store_sends_token_and_parses_records() {
        let router = Router::new().route(
            "/keys",
            get(|headers: HeaderMap| async move {
                let authorized = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    == Some("Bearer admin");
                if !authorized {
                    return Json(json!([]));
                }
                Json(json!([
                    { "user_id": "u1", "user_name": "One", "api_key": "k1" }
                ]))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let store = HttpKeyStore::new(
            &format!("http://{}/keys", addr),
            Some("admin".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();
        let records = store.list_entries().await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].user_id, "u1");
        assert_eq!(records[0].created_at, None);
    }
}
