use serde_json::{Map, Value};

use super::defaults::{KeyStoreKind, Settings};
use crate::core::errors::ApiError;

/// Structural validation of the merged config tree, before deserialization.
pub fn validate_config(config: &Value) -> Result<(), ApiError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(server) = expect_optional_object(root, "server")? {
        validate_optional_string_field(server, "server.host", "host")?;
        validate_u64_field(server, "server.port", "port", 1, 65535)?;
    }

    if let Some(retrieval) = expect_optional_object(root, "retrieval")? {
        validate_optional_string_field(retrieval, "retrieval.vector_store_dir", "vector_store_dir")?;
        validate_optional_string_field(
            retrieval,
            "retrieval.ephemeral_store_dir",
            "ephemeral_store_dir",
        )?;
        validate_u64_field(retrieval, "retrieval.default_k", "default_k", 1, 10_000)?;
        validate_u64_field(retrieval, "retrieval.fetch_k", "fetch_k", 1, 100_000)?;
        validate_f64_field(retrieval, "retrieval.mmr_lambda", "mmr_lambda", 0.0, 1.0)?;
        validate_u64_field(
            retrieval,
            "retrieval.max_context_chars",
            "max_context_chars",
            1,
            10_000_000,
        )?;
        validate_enum_field(
            retrieval,
            "retrieval.distance",
            "distance",
            &["cosine", "dot", "euclidean"],
        )?;
        if retrieval.contains_key("ephemeral_collection") {
            validate_required_string_field(
                retrieval,
                "retrieval.ephemeral_collection",
                "ephemeral_collection",
            )?;
        }
    }

    if let Some(embedding) = expect_optional_object(root, "embedding")? {
        validate_optional_string_field(embedding, "embedding.base_url", "base_url")?;
        validate_optional_string_field(embedding, "embedding.model_override", "model_override")?;
        validate_u64_field(embedding, "embedding.timeout_secs", "timeout_secs", 1, 86_400)?;
    }

    if let Some(generation) = expect_optional_object(root, "generation")? {
        validate_enum_field(
            generation,
            "generation.quantization",
            "quantization",
            &["none", "8bit", "4bit"],
        )?;
        validate_u64_field(generation, "generation.base_port", "base_port", 1, 65535)?;
        validate_u64_field(
            generation,
            "generation.max_new_tokens",
            "max_new_tokens",
            1,
            1_000_000,
        )?;
        validate_f64_field(generation, "generation.temperature", "temperature", 0.0, 10.0)?;
        validate_bool_field(generation, "generation.do_sample", "do_sample")?;
        validate_u64_field(generation, "generation.n_ctx", "n_ctx", 1, 10_000_000)?;
        validate_i64_field(
            generation,
            "generation.n_gpu_layers",
            "n_gpu_layers",
            -1,
            1_000_000,
        )?;
        validate_u64_field(generation, "generation.timeout_secs", "timeout_secs", 1, 86_400)?;
    }

    if let Some(proxy) = expect_optional_object(root, "proxy")? {
        validate_u64_field(proxy, "proxy.port", "port", 1, 65535)?;
        validate_u64_field(proxy, "proxy.timeout_secs", "timeout_secs", 1, 86_400)?;
        validate_optional_string_field(proxy, "proxy.upstream_base_url", "upstream_base_url")?;
        validate_optional_string_field(proxy, "proxy.upstream_api_key", "upstream_api_key")?;
    }

    if let Some(auth) = expect_optional_object(root, "auth")? {
        validate_bool_field(auth, "auth.enabled", "enabled")?;
        validate_u64_field(auth, "auth.refresh_secs", "refresh_secs", 1, 86_400)?;
        validate_enum_field(auth, "auth.key_store", "key_store", &["sqlite", "http"])?;
    }

    if let Some(storage) = expect_optional_object(root, "log_storage")? {
        validate_enum_field(
            storage,
            "log_storage.storage_type",
            "storage_type",
            &["local", "s3"],
        )?;
        validate_optional_string_field(storage, "log_storage.local_dir", "local_dir")?;
        validate_optional_string_field(storage, "log_storage.s3_bucket", "s3_bucket")?;
    }

    Ok(())
}

/// Cross-field checks the proxy needs before it can serve.
pub fn validate_proxy_settings(settings: &Settings) -> Result<(), ApiError> {
    if settings.proxy.upstream_api_key.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "OPENAI_API_KEY environment variable is required".to_string(),
        ));
    }
    if settings.proxy.upstream_base_url.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "OPENAI_BASE_URL environment variable is required".to_string(),
        ));
    }
    if settings.auth.enabled
        && settings.auth.key_store == KeyStoreKind::Http
        && settings
            .auth
            .key_store_url
            .as_deref()
            .map(str::trim)
            .unwrap_or("")
            .is_empty()
    {
        return Err(ApiError::BadRequest(
            "KEY_STORE_URL is required when KEY_STORE=http".to_string(),
        ));
    }
    Ok(())
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, ApiError> {
    match root.get(key) {
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(config_type_error(key, "object")),
        None => Ok(None),
    }
}

fn validate_bool_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.as_bool().is_some() {
        return Ok(());
    }
    Err(config_type_error(path, "boolean"))
}

fn validate_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_u64() else {
        return Err(config_type_error(path, "integer"));
    };
    if number < min || number > max {
        return Err(out_of_range(path, min, max));
    }
    Ok(())
}

fn validate_i64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: i64,
    max: i64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_i64() else {
        return Err(config_type_error(path, "integer"));
    };
    if number < min || number > max {
        return Err(out_of_range(path, min, max));
    }
    Ok(())
}

fn validate_f64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: f64,
    max: f64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_f64() else {
        return Err(config_type_error(path, "number"));
    };
    if number < min || number > max {
        return Err(out_of_range(path, min, max));
    }
    Ok(())
}

fn validate_required_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let value = section.get(key).ok_or_else(|| {
        ApiError::BadRequest(format!("Invalid config at '{}': value is required", path))
    })?;
    let Some(text) = value.as_str() else {
        return Err(config_type_error(path, "string"));
    };
    if text.trim().is_empty() {
        return Err(ApiError::BadRequest(format!(
            "Invalid config at '{}': value cannot be empty",
            path
        )));
    }
    Ok(())
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.is_null() || value.as_str().is_some() {
        return Ok(());
    }
    Err(config_type_error(path, "string"))
}

fn validate_enum_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    allowed: &[&str],
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(text) = value.as_str() else {
        return Err(config_type_error(path, "string"));
    };
    if allowed.contains(&text) {
        return Ok(());
    }
    Err(ApiError::BadRequest(format!(
        "Invalid config at '{}': expected one of {}",
        path,
        allowed.join(", ")
    )))
}

fn out_of_range<T: std::fmt::Display>(path: &str, min: T, max: T) -> ApiError {
    ApiError::BadRequest(format!(
        "Invalid config at '{}': must be between {} and {}",
        path, min, max
    ))
}

fn config_type_error(path: &str, expected: &str) -> ApiError {
    ApiError::BadRequest(format!(
        "Invalid config at '{}': expected {}",
        path, expected
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_empty_and_well_formed_configs() {
        assert!(validate_config(&json!({})).is_ok());
        assert!(validate_config(&json!({
            "server": { "port": 8000 },
            "retrieval": { "mmr_lambda": 0.5, "fetch_k": 20, "distance": "cosine" },
            "generation": { "quantization": "4bit", "do_sample": false },
            "auth": { "enabled": true, "key_store": "sqlite" },
            "log_storage": { "storage_type": "s3", "s3_bucket": "logs" }
        }))
        .is_ok());
    }

    #[test]
    fn rejects_out_of_range_and_mistyped_values() {
        let lambda = validate_config(&json!({ "retrieval": { "mmr_lambda": 1.5 } }));
        assert!(matches!(lambda, Err(ApiError::BadRequest(msg)) if msg.contains("mmr_lambda")));

        let port = validate_config(&json!({ "proxy": { "port": 0 } }));
        assert!(port.is_err());

        let timeout = validate_config(&json!({ "proxy": { "timeout_secs": "300" } }));
        assert!(matches!(timeout, Err(ApiError::BadRequest(msg)) if msg.contains("integer")));

        let quant = validate_config(&json!({ "generation": { "quantization": "2bit" } }));
        assert!(matches!(quant, Err(ApiError::BadRequest(msg)) if msg.contains("one of")));

        let section = validate_config(&json!({ "auth": true }));
        assert!(section.is_err());
    }

    #[test]
    fn proxy_requires_upstream_credentials() {
        let mut settings = Settings::default();
        assert!(validate_proxy_settings(&settings).is_err());

        settings.proxy.upstream_api_key = "sk-test".to_string();
        settings.proxy.upstream_base_url = "https://api.openai.com".to_string();
        assert!(validate_proxy_settings(&settings).is_ok());

        settings.auth.enabled = true;
        settings.auth.key_store = KeyStoreKind::Http;
        assert!(validate_proxy_settings(&settings).is_err());

        settings.auth.key_store_url = Some("http://keys".to_string());
        assert!(validate_proxy_settings(&settings).is_ok());
    }
}
