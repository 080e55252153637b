//! Append-only destinations for proxy log lines.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::core::config::{LogStorageSettings, StorageType};
use crate::core::errors::ApiError;

#[async_trait]
pub trait LogStore: Send + Sync {
    /// Human-readable destination, for startup logs.
    fn describe(&self) -> String;

    /// Appends `line` (already newline-terminated) to `file_name`.
    async fn append(&self, file_name: &str, line: &[u8]) -> Result<(), ApiError>;
}

pub struct LocalLogStore {
    dir: PathBuf,
}

impl LocalLogStore {
    pub async fn new(dir: &Path) -> Result<Self, ApiError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(ApiError::internal)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }
}

#[async_trait]
impl LogStore for LocalLogStore {
    fn describe(&self) -> String {
        format!("local:{}", self.dir.display())
    }

    async fn append(&self, file_name: &str, line: &[u8]) -> Result<(), ApiError> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(file_name))
            .await
            .map_err(ApiError::internal)?;
        file.write_all(line).await.map_err(ApiError::internal)?;
        file.flush().await.map_err(ApiError::internal)?;
        Ok(())
    }
}

#[cfg(feature = "s3")]
pub use s3::S3LogStore;

#[cfg(feature = "s3")]
mod s3 {
    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use aws_config::{BehaviorVersion, Region};
    use aws_sdk_s3::config::{Builder, Credentials};
    use aws_sdk_s3::primitives::ByteStream;
    use aws_sdk_s3::Client;
    use bytes::Bytes;
    use tokio::sync::Mutex;
    use tracing::{debug, info, warn};

    use super::LogStore;
    use crate::core::config::LogStorageSettings;
    use crate::core::errors::ApiError;

    /// S3-compatible bucket (AWS or MinIO). Objects have no native append, so
    /// each write reads, extends and rewrites the object under a per-key lock.
    pub struct S3LogStore {
        client: Client,
        bucket: String,
        prefix: Option<String>,
        key_locks: KeyLocks,
    }

    /// Per-object write locks. An entry lives only while some append holds
    /// or waits on it.
    #[derive(Default)]
    struct KeyLocks {
        locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    }

    impl KeyLocks {
        async fn acquire(&self, key: &str) -> Arc<Mutex<()>> {
            let mut locks = self.locks.lock().await;
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        }

        async fn release(&self, key: &str, lock: Arc<Mutex<()>>) {
            let mut locks = self.locks.lock().await;
            drop(lock);
            if locks
                .get(key)
                .is_some_and(|held| Arc::strong_count(held) == 1)
            {
                locks.remove(key);
            }
        }

        #[cfg(test)]
        async fn len(&self) -> usize {
            self.locks.lock().await.len()
        }
    }

    impl S3LogStore {
        pub async fn from_settings(settings: &LogStorageSettings) -> Result<Self, ApiError> {
            let region = Region::new(
                settings
                    .s3_region
                    .clone()
                    .unwrap_or_else(|| "us-east-1".to_string()),
            );

            let mut builder = match (&settings.access_key_id, &settings.secret_access_key) {
                (Some(access_key), Some(secret_key)) => {
                    let creds = Credentials::new(
                        access_key.clone(),
                        secret_key.clone(),
                        None,
                        None,
                        "static",
                    );
                    Builder::new().credentials_provider(creds)
                }
                _ => {
                    let shared = aws_config::defaults(BehaviorVersion::latest()).load().await;
                    Builder::from(&shared)
                }
            };
            builder = builder.region(region);
            if let Some(endpoint) = &settings.s3_endpoint {
                builder = builder.endpoint_url(endpoint.clone()).force_path_style(true);
            }

            let client = Client::from_conf(builder.build());

            match client.create_bucket().bucket(&settings.s3_bucket).send().await {
                Ok(_) => info!("Created log bucket {}", settings.s3_bucket),
                Err(err) => {
                    let service_err = err.into_service_error();
                    if service_err.is_bucket_already_owned_by_you()
                        || service_err.is_bucket_already_exists()
                    {
                        debug!("Log bucket {} already exists", settings.s3_bucket);
                    } else {
                        warn!(
                            "Could not create log bucket {}: {:?}. Writes will fail if it is missing.",
                            settings.s3_bucket, service_err
                        );
                    }
                }
            }

            Ok(Self {
                client,
                bucket: settings.s3_bucket.clone(),
                prefix: settings
                    .s3_prefix
                    .clone()
                    .map(|p| p.trim_matches('/').to_string())
                    .filter(|p| !p.is_empty()),
                key_locks: KeyLocks::default(),
            })
        }

        fn object_key(&self, file_name: &str) -> String {
            match &self.prefix {
                Some(prefix) => format!("{}/{}", prefix, file_name),
                None => file_name.to_string(),
            }
        }

        async fn read_existing(&self, key: &str) -> Result<Vec<u8>, ApiError> {
            match self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
            {
                Ok(response) => {
                    let data = response.body.collect().await.map_err(ApiError::internal)?;
                    Ok(data.into_bytes().to_vec())
                }
                Err(err) => {
                    let service_err = err.into_service_error();
                    if service_err.is_no_such_key() {
                        Ok(Vec::new())
                    } else {
                        Err(ApiError::Internal(format!(
                            "Failed to get object {}: {:?}",
                            key, service_err
                        )))
                    }
                }
            }
        }

        async fn rewrite_with(&self, key: &str, line: &[u8]) -> Result<(), ApiError> {
            let mut data = self.read_existing(key).await?;
            data.extend_from_slice(line);
            debug!("put_object bucket={} key={} size={}", self.bucket, key, data.len());

            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .content_type("application/x-ndjson")
                .body(ByteStream::from(Bytes::from(data)))
                .send()
                .await
                .map_err(|e| ApiError::Internal(format!("Failed to put object {}: {:?}", key, e)))?;
            Ok(())
        }
    }

    #[async_trait]
    impl LogStore for S3LogStore {
        fn describe(&self) -> String {
            format!("s3://{}/{}", self.bucket, self.prefix.clone().unwrap_or_default())
        }

        async fn append(&self, file_name: &str, line: &[u8]) -> Result<(), ApiError> {
            let key = self.object_key(file_name);
            let lock = self.key_locks.acquire(&key).await;
            let result = {
                let _guard = lock.lock().await;
                self.rewrite_with(&key, line).await
            };
            self.key_locks.release(&key, lock).await;
            result
        }
    }

}

/// Builds the store selected by `STORAGE_TYPE`.
pub async fn from_settings(
    settings: &LogStorageSettings,
    base_dir: &Path,
) -> Result<Arc<dyn LogStore>, ApiError> {
    match settings.storage_type {
        StorageType::Local => {
            let dir = if settings.local_dir.is_absolute() {
                settings.local_dir.clone()
            } else {
                base_dir.join(&settings.local_dir)
            };
            Ok(Arc::new(LocalLogStore::new(&dir).await?))
        }
        #[cfg(feature = "s3")]
        StorageType::S3 => Ok(Arc::new(S3LogStore::from_settings(settings).await?)),
        #[cfg(not(feature = "s3"))]
        StorageType::S3 => Err(ApiError::BadRequest(
            "STORAGE_TYPE=s3 requires the `s3` feature".to_string(),
        )),
    }
}
