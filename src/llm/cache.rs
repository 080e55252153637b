//! Process-lifetime cache of loaded generation models.
//!
//! Loads are single-flight per model identifier: the first caller starts the
//! load on a detached task and every concurrent caller awaits the same result.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tracing::{error, info};

use super::types::{GenerationParameters, InferenceEngine, ModelHandle, Quantization};
use crate::core::errors::ApiError;

#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(
        &self,
        model_identifier: &str,
        quantization: Quantization,
        parameters: &GenerationParameters,
    ) -> Result<Arc<dyn InferenceEngine>, ApiError>;
}

type LoadFuture = Shared<BoxFuture<'static, Result<Arc<ModelHandle>, ApiError>>>;

enum Slot {
    Ready(Arc<ModelHandle>),
    Loading(LoadFuture),
}

type Slots = Arc<Mutex<HashMap<String, Slot>>>;

pub struct GenerationModelCache {
    loader: Arc<dyn ModelLoader>,
    slots: Slots,
}

impl GenerationModelCache {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn get_or_load(
        &self,
        model_identifier: &str,
        quantization: Quantization,
        parameters: &GenerationParameters,
    ) -> Result<Arc<ModelHandle>, ApiError> {
        let pending = {
            let mut slots = self
                .slots
                .lock()
                .map_err(|_| ApiError::internal("model cache lock poisoned"))?;
            match slots.get(model_identifier) {
                Some(Slot::Ready(handle)) => return Ok(handle.clone()),
                Some(Slot::Loading(pending)) => pending.clone(),
                None => {
                    let pending = self.start_load(model_identifier, quantization, parameters);
                    slots.insert(model_identifier.to_string(), Slot::Loading(pending.clone()));
                    pending
                }
            }
        };

        pending.await
    }

    /// Identifiers of fully loaded models.
    pub fn loaded(&self) -> Vec<String> {
        let Ok(slots) = self.slots.lock() else {
            return Vec::new();
        };
        let mut ids: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn start_load(
        &self,
        model_identifier: &str,
        quantization: Quantization,
        parameters: &GenerationParameters,
    ) -> LoadFuture {
        let loader = self.loader.clone();
        let slots = self.slots.clone();
        let id = model_identifier.to_string();
        let parameters = parameters.clone();

        // Detached so a cancelled caller never aborts a load others wait on.
        let task = tokio::spawn(async move {
            info!("Loading generation model {} ({})", id, quantization);
            let result = loader
                .load(&id, quantization, &parameters)
                .await
                .map(|engine| Arc::new(ModelHandle::new(id.clone(), quantization, parameters, engine)));

            if let Ok(mut slots) = slots.lock() {
                match &result {
                    Ok(handle) => {
                        slots.insert(id.clone(), Slot::Ready(handle.clone()));
                    }
                    Err(_) => {
                        slots.remove(&id);
                    }
                }
            }

            match &result {
                Ok(_) => info!("Generation model {} ready", id),
                Err(err) => error!("Failed to load generation model {}: {}", id, err),
            }
            result
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(join_err) => Err(ApiError::Generation(format!(
                    "model load task failed: {}",
                    join_err
                ))),
            }
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Replies "hi" to prompts containing "hi", otherwise echoes the prompt.
    pub(crate) struct EchoEngine;

    #[async_trait]
    impl InferenceEngine for EchoEngine {
        async fn infer(&self, prompt: &str, _params: &GenerationParameters) -> Result<String, ApiError> {
            if prompt.to_lowercase().contains("hi") {
                Ok(format!("{} hi", prompt))
            } else {
                Ok(prompt.to_string())
            }
        }
    }

    /// Counts loads; fails the first `failures` attempts.
    pub(crate) struct CountingLoader {
        pub loads: AtomicUsize,
        pub failures: usize,
        pub delay: Duration,
    }

    impl CountingLoader {
        pub fn new() -> Self {
            Self {
                loads: AtomicUsize::new(0),
                failures: 0,
                delay: Duration::from_millis(50),
            }
        }
    }

    #[async_trait]
    impl ModelLoader for CountingLoader {
        async fn load(
            &self,
            _model_identifier: &str,
            _quantization: Quantization,
            _parameters: &GenerationParameters,
        ) -> Result<Arc<dyn InferenceEngine>, ApiError> {
            let attempt = self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if attempt < self.failures {
                return Err(ApiError::Generation("out of memory".to_string()));
            }
            Ok(Arc::new(EchoEngine))
        }
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_load() {
        let loader = Arc::new(CountingLoader::new());
        let cache = Arc::new(GenerationModelCache::new(loader.clone()));
        let params = GenerationParameters::default();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                let params = params.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_load("olmo", Quantization::FourBit, &params)
                        .await
                })
            })
            .collect();

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap().unwrap());
        }

        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));

        let again = cache
            .get_or_load("olmo", Quantization::FourBit, &params)
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&again, &handles[0]));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.loaded(), vec!["olmo".to_string()]);
    }

    #[tokio::test]
    async fn failed_load_reaches_all_waiters_and_is_retried() {
        let loader = Arc::new(CountingLoader {
            failures: 1,
            ..CountingLoader::new()
        });
        let cache = GenerationModelCache::new(loader.clone());
        let params = GenerationParameters::default();

        let (first, second) = tokio::join!(
            cache.get_or_load("olmo", Quantization::EightBit, &params),
            cache.get_or_load("olmo", Quantization::EightBit, &params),
        );
        assert!(matches!(first, Err(ApiError::Generation(_))));
        assert!(matches!(second, Err(ApiError::Generation(_))));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(cache.loaded().is_empty());

        let retried = cache
            .get_or_load("olmo", Quantization::EightBit, &params)
            .await
            .unwrap();
        assert_eq!(retried.quantization, Quantization::EightBit);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancelled_caller_does_not_abort_load() {
        let loader = Arc::new(CountingLoader {
            delay: Duration::from_millis(100),
            ..CountingLoader::new()
        });
        let cache = Arc::new(GenerationModelCache::new(loader.clone()));
        let params = GenerationParameters::default();

        let early = {
            let cache = cache.clone();
            let params = params.clone();
            tokio::spawn(async move {
                cache
                    .get_or_load("olmo", Quantization::None, &params)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        early.abort();

        let handle = cache
            .get_or_load("olmo", Quantization::None, &params)
            .await
            .unwrap();
        assert_eq!(handle.model_identifier, "olmo");
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_identifiers_load_separately() {
        let loader = Arc::new(CountingLoader::new());
        let cache = GenerationModelCache::new(loader.clone());
        let params = GenerationParameters::default();

        cache.get_or_load("a", Quantization::FourBit, &params).await.unwrap();
        cache.get_or_load("b", Quantization::FourBit, &params).await.unwrap();

        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }
}
