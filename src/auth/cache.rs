//! In-memory API key snapshot with periodic background refresh.
//!
//! `validate` only reads the current snapshot. Refresh failures keep the
//! previous snapshot in place and are reported at warn level.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::key_store::KeyStore;
use crate::core::errors::ApiError;
use crate::core::security::require_bearer;

#[derive(Debug, Clone, PartialEq)]
pub struct AuthCacheEntry {
    pub api_key: String,
    pub user_id: String,
    pub display_name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Default)]
struct Snapshot {
    entries: HashMap<String, AuthCacheEntry>,
    refreshed_at: Option<DateTime<Utc>>,
}

pub struct AuthCache {
    store: Arc<dyn KeyStore>,
    snapshot: RwLock<Arc<Snapshot>>,
    refresh_interval: Duration,
}

impl AuthCache {
    pub fn new(store: Arc<dyn KeyStore>, refresh_interval: Duration) -> Self {
        Self {
            store,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            refresh_interval,
        }
    }

    fn current(&self) -> Arc<Snapshot> {
        match self.snapshot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn validate(&self, api_key: &str) -> Option<AuthCacheEntry> {
        self.current().entries.get(api_key).cloned()
    }

    /// Resolves the caller from an `Authorization: Bearer` header.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<AuthCacheEntry, ApiError> {
        let token = require_bearer(headers)?;
        match self.validate(token) {
            Some(entry) => {
                debug!("Valid API key for user_id: {}", entry.user_id);
                Ok(entry)
            }
            None => {
                warn!("Invalid API key attempted");
                Err(ApiError::Unauthorized)
            }
        }
    }

    pub fn is_populated(&self) -> bool {
        self.current().refreshed_at.is_some()
    }

    pub fn len(&self) -> usize {
        self.current().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replaces the snapshot from the backing store. On failure the old
    /// snapshot stays and the error is returned after a warning.
    pub async fn refresh(&self) -> Result<usize, ApiError> {
        let records = match self.store.list_entries().await {
            Ok(records) => records,
            Err(err) => {
                warn!(
                    "Failed to refresh API keys from {} store: {}. Using stale cache.",
                    self.store.name(),
                    err
                );
                return Err(err);
            }
        };

        let fetched_at = Utc::now();
        let mut entries = HashMap::with_capacity(records.len());
        for record in records {
            if record.api_key.is_empty() || record.user_id.is_empty() {
                continue;
            }
            if entries.contains_key(&record.api_key) {
                warn!("Duplicate API key for user_id {} ignored", record.user_id);
                continue;
            }
            entries.insert(
                record.api_key.clone(),
                AuthCacheEntry {
                    api_key: record.api_key,
                    user_id: record.user_id,
                    display_name: record.user_name,
                    created_at: record.created_at,
                    fetched_at,
                },
            );
        }

        let count = entries.len();
        let next = Arc::new(Snapshot {
            entries,
            refreshed_at: Some(fetched_at),
        });
        match self.snapshot.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }

        info!("Auth cache refreshed with {} keys", count);
        Ok(count)
    }

    /// Runs `refresh` every `refresh_interval`, until aborted. The first run
    /// is one interval out; callers load the initial snapshot themselves.
    pub fn spawn_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let period = cache.refresh_interval;
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let _ = cache.refresh().await;
            }
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::key_store::KeyRecord;
    use async_trait::async_trait;
    use axum::http::HeaderValue;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Key store held in memory; `fail` simulates an outage.
    pub(crate) struct MemoryKeyStore {
        pub records: Mutex<Vec<KeyRecord>>,
        pub fail: AtomicBool,
    }

    impl MemoryKeyStore {
        pub fn with(records: Vec<KeyRecord>) -> Self {
            Self {
                records: Mutex::new(records),
                fail: AtomicBool::new(false),
            }
        }
    }

    pub(crate) fn record(user_id: &str, api_key: &str) -> KeyRecord {
        KeyRecord {
            user_id: user_id.to_string(),
            user_name: format!("{} name", user_id),
            api_key: api_key.to_string(),
            created_at: None,
        }
    }

    #[async_trait]
    impl KeyStore for MemoryKeyStore {
        fn name(&self) -> &str {
            "memory"
        }

        async fn list_entries(&self) -> Result<Vec<KeyRecord>, ApiError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ApiError::ServiceUnavailable);
            }
            Ok(self.records.lock().unwrap().clone())
        }
    }

    #[tokio::test]
    async fn starts_empty_and_populates_on_refresh() {
        let store = Arc::new(MemoryKeyStore::with(vec![record("u1", "k1")]));
        let cache = AuthCache::new(store, Duration::from_secs(300));

        assert!(!cache.is_populated());
        assert_eq!(cache.validate("k1"), None);

        assert_eq!(cache.refresh().await.unwrap(), 1);
        assert!(cache.is_populated());
        let entry = cache.validate("k1").unwrap();
        assert_eq!(entry.user_id, "u1");
        assert_eq!(entry.display_name, "u1 name");
    }

    #[tokio::test]
    async fn serves_stale_snapshot_when_store_fails() {
        let store = Arc::new(MemoryKeyStore::with(vec![record("u1", "k1")]));
        let cache = AuthCache::new(store.clone(), Duration::from_secs(300));
        cache.refresh().await.unwrap();

        store.fail.store(true, Ordering::SeqCst);
        assert!(cache.refresh().await.is_err());

        assert_eq!(cache.validate("k1").map(|e| e.user_id), Some("u1".to_string()));
        assert_eq!(cache.validate("unknown"), None);
    }

    #[tokio::test]
    async fn successful_refresh_replaces_snapshot() {
        let store = Arc::new(MemoryKeyStore::with(vec![record("u1", "k1")]));
        let cache = AuthCache::new(store.clone(), Duration::from_secs(300));
        cache.refresh().await.unwrap();

        *store.records.lock().unwrap() = vec![record("u2", "k2"), record("u3", "k2")];
        cache.refresh().await.unwrap();

        assert_eq!(cache.validate("k1"), None);
        assert_eq!(cache.validate("k2").map(|e| e.user_id), Some("u2".to_string()));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn authenticate_requires_known_bearer_token() {
        let store = Arc::new(MemoryKeyStore::with(vec![record("u1", "k1")]));
        let cache = AuthCache::new(store, Duration::from_secs(300));
        cache.refresh().await.unwrap();

        let missing = HeaderMap::new();
        assert!(matches!(cache.authenticate(&missing), Err(ApiError::Unauthorized)));

        let mut wrong = HeaderMap::new();
        wrong.insert("authorization", HeaderValue::from_static("Bearer nope"));
        assert!(matches!(cache.authenticate(&wrong), Err(ApiError::Unauthorized)));

        let mut good = HeaderMap::new();
        good.insert("authorization", HeaderValue::from_static("Bearer k1"));
        assert_eq!(cache.authenticate(&good).unwrap().user_id, "u1");
    }

    #[tokio::test(start_paused = true)]
    async fn background_task_refreshes_on_interval() {
        let store = Arc::new(MemoryKeyStore::with(vec![record("u1", "k1")]));
        let cache = Arc::new(AuthCache::new(store.clone(), Duration::from_secs(300)));
        let task = cache.spawn_refresh();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!cache.is_populated());

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(cache.validate("k1").is_some());

        *store.records.lock().unwrap() = vec![record("u2", "k2")];
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(cache.validate("k2").is_some());
        assert!(cache.validate("k1").is_none());

        task.abort();
    }
}
