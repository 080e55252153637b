//! Typed settings and their built-in defaults.
//!
//! Values are layered as: defaults < `config.yml` < `secrets.yaml` < environment.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::llm::Quantization;
use crate::rag::DistanceMetric;

pub const EPHEMERAL_COLLECTION: &str = "ephemeral_collection";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub retrieval: RetrievalSettings,
    pub embedding: EmbeddingSettings,
    pub generation: GenerationSettings,
    pub proxy: ProxySettings,
    pub auth: AuthSettings,
    pub log_storage: LogStorageSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Browser origins allowed by CORS; empty allows any.
    pub cors_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    /// Storage location used when a request names a collection without a path.
    pub vector_store_dir: Option<PathBuf>,
    pub ephemeral_store_dir: Option<PathBuf>,
    pub ephemeral_collection: String,
    pub default_k: usize,
    pub mmr_lambda: f32,
    pub fetch_k: usize,
    pub distance: DistanceMetric,
    pub max_context_chars: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            vector_store_dir: None,
            ephemeral_store_dir: None,
            ephemeral_collection: EPHEMERAL_COLLECTION.to_string(),
            default_k: 2,
            mmr_lambda: 0.5,
            fetch_k: 20,
            distance: DistanceMetric::Cosine,
            max_context_chars: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Replaces the `embedding_model` of every request when set.
    pub model_override: Option<String>,
    pub timeout_secs: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8090".to_string(),
            api_key: None,
            model_override: None,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub models_dir: Option<PathBuf>,
    pub llama_server_path: Option<PathBuf>,
    pub base_port: u16,
    pub quantization: Quantization,
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub do_sample: bool,
    pub n_ctx: usize,
    pub n_gpu_layers: i32,
    pub timeout_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            models_dir: None,
            llama_server_path: None,
            base_port: 8100,
            quantization: Quantization::FourBit,
            max_new_tokens: 512,
            temperature: 0.7,
            do_sample: true,
            n_ctx: 4096,
            n_gpu_layers: -1,
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub host: String,
    pub port: u16,
    pub upstream_base_url: String,
    pub upstream_api_key: String,
    pub timeout_secs: u64,
    pub max_body_bytes: usize,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8888,
            upstream_base_url: String::new(),
            upstream_api_key: String::new(),
            timeout_secs: 300,
            max_body_bytes: 32 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeyStoreKind {
    #[default]
    Sqlite,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub enabled: bool,
    pub refresh_secs: u64,
    pub key_store: KeyStoreKind,
    pub key_store_url: Option<String>,
    pub key_store_token: Option<String>,
    pub key_store_db: Option<PathBuf>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            refresh_secs: 300,
            key_store: KeyStoreKind::Sqlite,
            key_store_url: None,
            key_store_token: None,
            key_store_db: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Local,
    S3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogStorageSettings {
    pub storage_type: StorageType,
    pub local_dir: PathBuf,
    pub s3_bucket: String,
    pub s3_prefix: Option<String>,
    pub s3_endpoint: Option<String>,
    pub s3_region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl Default for LogStorageSettings {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Local,
            local_dir: PathBuf::from("logs"),
            s3_bucket: "proxy-logs".to_string(),
            s3_prefix: None,
            s3_endpoint: None,
            s3_region: None,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}
