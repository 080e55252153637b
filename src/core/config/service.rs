use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use super::defaults::Settings;
use super::paths::AppPaths;
use super::validation::validate_config;
use crate::core::errors::ApiError;

pub const REDACT_PLACEHOLDER: &str = "****";

const SENSITIVE_PATTERNS: [&str; 16] = [
    "api_key",
    "secret",
    "password",
    "_token",
    "token_",
    "credential",
    "private_key",
    "auth_",
    "authorization",
    "cookie",
    "access_key",
    "access_token",
    "refresh_token",
    "auth_token",
    "bearer",
    "key_id",
];

const SENSITIVE_WHITELIST: [&str; 5] = [
    "max_tokens",
    "max_new_tokens",
    "total_tokens",
    "token_count",
    "tokens",
];

#[derive(Clone, Copy)]
enum EnvKind {
    Str,
    Int,
    Float,
    Bool,
}

/// Environment variables and the config path each one overrides.
const ENV_OVERRIDES: &[(&str, &[&str], EnvKind)] = &[
    ("LLMAVEN_HOST", &["server", "host"], EnvKind::Str),
    ("LLMAVEN_PORT", &["server", "port"], EnvKind::Int),
    ("LLMAVEN_VECTOR_STORE_DIR", &["retrieval", "vector_store_dir"], EnvKind::Str),
    ("LLMAVEN_EPHEMERAL_STORE_DIR", &["retrieval", "ephemeral_store_dir"], EnvKind::Str),
    ("LLMAVEN_MMR_LAMBDA", &["retrieval", "mmr_lambda"], EnvKind::Float),
    ("LLMAVEN_FETCH_K", &["retrieval", "fetch_k"], EnvKind::Int),
    ("LLMAVEN_EMBEDDING_MODEL", &["embedding", "model_override"], EnvKind::Str),
    ("LLMAVEN_EMBEDDING_BASE_URL", &["embedding", "base_url"], EnvKind::Str),
    ("LLMAVEN_EMBEDDING_API_KEY", &["embedding", "api_key"], EnvKind::Str),
    ("LLMAVEN_MODELS_DIR", &["generation", "models_dir"], EnvKind::Str),
    ("LLAMA_SERVER_PATH", &["generation", "llama_server_path"], EnvKind::Str),
    ("LLMAVEN_QUANTIZATION", &["generation", "quantization"], EnvKind::Str),
    ("LLMAVEN_MAX_NEW_TOKENS", &["generation", "max_new_tokens"], EnvKind::Int),
    ("LLMAVEN_TEMPERATURE", &["generation", "temperature"], EnvKind::Float),
    ("LLMAVEN_DO_SAMPLE", &["generation", "do_sample"], EnvKind::Bool),
    ("LLMAVEN_GENERATION_TIMEOUT", &["generation", "timeout_secs"], EnvKind::Int),
    ("PROXY_PORT", &["proxy", "port"], EnvKind::Int),
    ("PROXY_TIMEOUT", &["proxy", "timeout_secs"], EnvKind::Int),
    ("OPENAI_BASE_URL", &["proxy", "upstream_base_url"], EnvKind::Str),
    ("OPENAI_API_KEY", &["proxy", "upstream_api_key"], EnvKind::Str),
    ("AUTH_ENABLED", &["auth", "enabled"], EnvKind::Bool),
    ("AUTH_REFRESH_SECS", &["auth", "refresh_secs"], EnvKind::Int),
    ("KEY_STORE", &["auth", "key_store"], EnvKind::Str),
    ("KEY_STORE_URL", &["auth", "key_store_url"], EnvKind::Str),
    ("KEY_STORE_TOKEN", &["auth", "key_store_token"], EnvKind::Str),
    ("KEY_STORE_DB", &["auth", "key_store_db"], EnvKind::Str),
    ("STORAGE_TYPE", &["log_storage", "storage_type"], EnvKind::Str),
    ("LOCAL_LOG_DIR", &["log_storage", "local_dir"], EnvKind::Str),
    ("LOG_S3_BUCKET", &["log_storage", "s3_bucket"], EnvKind::Str),
    ("LOG_S3_PREFIX", &["log_storage", "s3_prefix"], EnvKind::Str),
    ("AWS_ENDPOINT_URL", &["log_storage", "s3_endpoint"], EnvKind::Str),
    ("AWS_REGION", &["log_storage", "s3_region"], EnvKind::Str),
    ("AWS_ACCESS_KEY_ID", &["log_storage", "access_key_id"], EnvKind::Str),
    ("AWS_SECRET_ACCESS_KEY", &["log_storage", "secret_access_key"], EnvKind::Str),
];

#[derive(Clone)]
pub struct ConfigService {
    paths: Arc<AppPaths>,
}

impl ConfigService {
    pub fn new(paths: Arc<AppPaths>) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub fn config_path(&self) -> PathBuf {
        if let Ok(path) = env::var("LLMAVEN_CONFIG_PATH") {
            return PathBuf::from(path);
        }

        let user_config = self.paths.user_data_dir.join("config.yml");
        if user_config.exists() {
            return user_config;
        }

        self.paths.project_root.join("config.yml")
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.paths.secrets_path.clone()
    }

    pub fn load_config(&self) -> Value {
        let public_config = load_yaml_file(&self.config_path());
        let secrets_config = load_yaml_file(&self.secrets_path());
        deep_merge(&public_config, &secrets_config)
    }

    pub fn load_settings(&self) -> Result<Settings, ApiError> {
        self.load_settings_with(|key| env::var(key).ok())
    }

    /// Like [`load_settings`](Self::load_settings) with an explicit environment lookup.
    pub fn load_settings_with<F>(&self, lookup: F) -> Result<Settings, ApiError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = self.load_config();
        apply_env_overrides(&mut config, lookup)?;
        validate_config(&config)?;

        let settings: Settings = serde_json::from_value(config)
            .map_err(|e| ApiError::BadRequest(format!("Invalid config: {}", e)))?;
        Ok(self.resolve_paths(settings))
    }

    /// Effective settings as JSON with credentials masked, for startup logging.
    pub fn redacted_settings(&self, settings: &Settings) -> Value {
        match serde_json::to_value(settings) {
            Ok(value) => redact_sensitive_values(&value),
            Err(_) => Value::Null,
        }
    }

    fn resolve_paths(&self, mut settings: Settings) -> Settings {
        let retrieval = &mut settings.retrieval;
        if retrieval.vector_store_dir.is_none() {
            retrieval.vector_store_dir = Some(self.paths.vector_store_dir.clone());
        }
        if retrieval.ephemeral_store_dir.is_none() {
            retrieval.ephemeral_store_dir = Some(self.paths.ephemeral_store_dir.clone());
        }
        if settings.generation.models_dir.is_none() {
            settings.generation.models_dir = Some(self.paths.models_dir.clone());
        }
        if settings.auth.key_store_db.is_none() {
            settings.auth.key_store_db = Some(self.paths.key_store_db.clone());
        }
        settings
    }
}

fn load_yaml_file(path: &Path) -> Value {
    if !path.exists() {
        return Value::Object(Map::new());
    }

    match fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<Value>(&contents) {
            Ok(value) => match value {
                Value::Object(_) => value,
                _ => Value::Object(Map::new()),
            },
            Err(err) => {
                tracing::warn!("Ignoring unparsable config {}: {}", path.display(), err);
                Value::Object(Map::new())
            }
        },
        Err(_) => Value::Object(Map::new()),
    }
}

fn apply_env_overrides<F>(config: &mut Value, lookup: F) -> Result<(), ApiError>
where
    F: Fn(&str) -> Option<String>,
{
    if !config.is_object() {
        *config = Value::Object(Map::new());
    }

    for (name, path, kind) in ENV_OVERRIDES {
        let Some(raw) = lookup(name) else {
            continue;
        };
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let value = parse_env_value(name, raw, *kind)?;
        ensure_object_path(config, path, value);
    }

    Ok(())
}

fn parse_env_value(name: &str, raw: &str, kind: EnvKind) -> Result<Value, ApiError> {
    let invalid = |expected: &str| {
        ApiError::BadRequest(format!(
            "Invalid value for {}: expected {}, got '{}'",
            name, expected, raw
        ))
    };

    match kind {
        EnvKind::Str => Ok(Value::String(raw.to_string())),
        EnvKind::Int => raw
            .parse::<u64>()
            .map(Value::from)
            .map_err(|_| invalid("integer")),
        EnvKind::Float => raw
            .parse::<f64>()
            .map(Value::from)
            .map_err(|_| invalid("number")),
        EnvKind::Bool => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Value::Bool(true)),
            "0" | "false" | "no" | "off" => Ok(Value::Bool(false)),
            _ => Err(invalid("boolean")),
        },
    }
}

fn ensure_object_path(config: &mut Value, path: &[&str], value: Value) {
    if path.is_empty() {
        return;
    }

    let mut current = config;
    for (index, key) in path.iter().enumerate() {
        if index == path.len() - 1 {
            if let Some(map) = current.as_object_mut() {
                map.insert(key.to_string(), value);
            }
            return;
        }

        if !current.get(*key).map(|v| v.is_object()).unwrap_or(false) {
            let Some(map) = current.as_object_mut() else {
                return;
            };
            map.insert((*key).to_string(), Value::Object(Map::new()));
        }

        let Some(next) = current.get_mut(*key) else {
            return;
        };
        current = next;
    }
}

fn deep_merge(base: &Value, override_value: &Value) -> Value {
    match (base, override_value) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged: Map<String, Value> = base_map.clone();
            for (key, value) in override_map {
                let merged_value = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Value::Object(merged)
        }
        _ => override_value.clone(),
    }
}

fn redact_sensitive_values(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = Map::new();
            for (key, val) in map {
                if is_sensitive_key(key) && !val.is_null() {
                    redacted.insert(key.clone(), Value::String(REDACT_PLACEHOLDER.to_string()));
                } else {
                    redacted.insert(key.clone(), redact_sensitive_values(val));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive_values).collect()),
        _ => value.clone(),
    }
}

/// Whether a config key or header name names a credential.
pub fn is_sensitive_key(key: &str) -> bool {
    let key_lower = key.to_lowercase().replace('-', "_");
    if SENSITIVE_WHITELIST
        .iter()
        .any(|allowed| *allowed == key_lower)
    {
        return false;
    }
    SENSITIVE_PATTERNS
        .iter()
        .any(|pattern| key_lower.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::defaults::{KeyStoreKind, StorageType};
    use crate::llm::Quantization;
    use serde_json::json;
    use std::collections::HashMap;

    fn service_in(dir: &Path) -> ConfigService {
        ConfigService::new(Arc::new(AppPaths::with_roots(
            dir.to_path_buf(),
            dir.join("data"),
        )))
    }

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn deep_merge_merges_objects_and_overrides_scalars() {
        let base = json!({
            "a": 1,
            "b": { "c": 2, "d": 3 },
            "arr": [1, 2]
        });
        let override_value = json!({
            "b": { "c": 99 },
            "arr": [3],
            "e": "x"
        });

        let merged = deep_merge(&base, &override_value);

        assert_eq!(
            merged,
            json!({
                "a": 1,
                "b": { "c": 99, "d": 3 },
                "arr": [3],
                "e": "x"
            })
        );
    }

    #[test]
    fn redact_sensitive_values_replaces_secrets_only() {
        let input = json!({
            "proxy": {
                "upstream_api_key": "sk-live",
                "timeout_secs": 300
            },
            "generation": { "max_new_tokens": 42 },
            "log_storage": { "secret_access_key": "aws", "access_key_id": "AKIA" }
        });

        let redacted = redact_sensitive_values(&input);

        assert_eq!(
            redacted,
            json!({
                "proxy": {
                    "upstream_api_key": "****",
                    "timeout_secs": 300
                },
                "generation": { "max_new_tokens": 42 },
                "log_storage": { "secret_access_key": "****", "access_key_id": "****" }
            })
        );
    }

    #[test]
    fn redacted_settings_hide_env_supplied_keys() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let service = service_in(tmp.path());
        let settings = service
            .load_settings_with(env_from(&[("OPENAI_API_KEY", "sk-from-env")]))
            .expect("settings");

        let redacted = service.redacted_settings(&settings);

        assert_eq!(redacted["proxy"]["upstream_api_key"], "****");
        assert!(!redacted.to_string().contains("sk-from-env"));
        assert_eq!(redacted["retrieval"]["default_k"], 2);
    }

    #[test]
    fn header_names_are_matched_case_and_dash_insensitively() {
        assert!(is_sensitive_key("Authorization"));
        assert!(is_sensitive_key("x-api-key"));
        assert!(is_sensitive_key("Cookie"));
        assert!(!is_sensitive_key("content-type"));
        assert!(!is_sensitive_key("max_tokens"));
    }

    #[test]
    fn defaults_apply_without_any_config() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let service = service_in(tmp.path());

        let settings = service.load_settings_with(|_| None).expect("settings");

        assert_eq!(settings.server.port, 8000);
        assert_eq!(settings.proxy.port, 8888);
        assert_eq!(settings.proxy.timeout_secs, 300);
        assert_eq!(settings.retrieval.default_k, 2);
        assert!(!settings.auth.enabled);
        assert_eq!(settings.log_storage.storage_type, StorageType::Local);
        assert_eq!(
            settings.retrieval.vector_store_dir,
            Some(tmp.path().join("data/vector_stores"))
        );
    }

    #[test]
    fn environment_overrides_yaml() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::write(
            tmp.path().join("config.yml"),
            "proxy:\n  port: 9000\n  upstream_base_url: http://yaml\nretrieval:\n  mmr_lambda: 0.3\n",
        )
        .expect("write config");
        let service = service_in(tmp.path());

        let settings = service
            .load_settings_with(env_from(&[
                ("PROXY_PORT", "9100"),
                ("AUTH_ENABLED", "true"),
                ("KEY_STORE", "http"),
                ("KEY_STORE_URL", "http://keys.internal/users"),
                ("STORAGE_TYPE", "s3"),
                ("LLMAVEN_QUANTIZATION", "8bit"),
                ("LLMAVEN_EMBEDDING_MODEL", "all-minilm"),
            ]))
            .expect("settings");

        assert_eq!(settings.proxy.port, 9100);
        assert_eq!(settings.proxy.upstream_base_url, "http://yaml");
        assert!((settings.retrieval.mmr_lambda - 0.3).abs() < 1e-6);
        assert!(settings.auth.enabled);
        assert_eq!(settings.auth.key_store, KeyStoreKind::Http);
        assert_eq!(settings.log_storage.storage_type, StorageType::S3);
        assert_eq!(settings.generation.quantization, Quantization::EightBit);
        assert_eq!(
            settings.embedding.model_override.as_deref(),
            Some("all-minilm")
        );
    }

    #[test]
    fn malformed_environment_values_are_rejected() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let service = service_in(tmp.path());

        let err = service
            .load_settings_with(env_from(&[("PROXY_TIMEOUT", "soon")]))
            .expect_err("non-numeric timeout should fail");
        assert!(err.to_string().contains("PROXY_TIMEOUT"));

        let err = service
            .load_settings_with(env_from(&[("AUTH_ENABLED", "maybe")]))
            .expect_err("non-boolean flag should fail");
        assert!(err.to_string().contains("AUTH_ENABLED"));
    }
}
