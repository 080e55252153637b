//! `llama-server` backed model loading.
//!
//! Each loaded model runs in its own `llama-server` child process on a
//! dedicated port. The child is killed when its engine is dropped.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::cache::ModelLoader;
use super::types::{GenerationParameters, InferenceEngine, Quantization};
use crate::core::config::{AppPaths, GenerationSettings};
use crate::core::errors::ApiError;

const MAX_SERVER_RETRIES: u32 = 120;
const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct LlamaServerLoader {
    server_path: PathBuf,
    models_dir: PathBuf,
    next_port: AtomicU16,
    client: Client,
}

impl LlamaServerLoader {
    pub fn new(paths: &AppPaths, settings: &GenerationSettings) -> Self {
        let server_path = settings
            .llama_server_path
            .clone()
            .unwrap_or_else(|| Self::find_server_binary(paths));
        let models_dir = settings
            .models_dir
            .clone()
            .unwrap_or_else(|| paths.models_dir.clone());

        Self {
            server_path,
            models_dir,
            next_port: AtomicU16::new(settings.base_port),
            client: Client::new(),
        }
    }

    fn find_server_binary(paths: &AppPaths) -> PathBuf {
        let candidates = [
            paths.project_root.join("bin/llama-server.exe"),
            paths.project_root.join("bin/llama-server"),
            PathBuf::from("llama-server"),
        ];

        for path in candidates {
            if path.exists() || which::which(&path).is_ok() {
                return path;
            }
        }
        PathBuf::from("llama-server")
    }

    async fn wait_for_health(&self, port: u16, child: &mut Child) -> Result<(), ApiError> {
        let url = format!("http://127.0.0.1:{}/health", port);
        for _ in 0..MAX_SERVER_RETRIES {
            if let Ok(Some(status)) = child.try_wait() {
                return Err(ApiError::Generation(format!(
                    "llama-server exited during startup: {}",
                    status
                )));
            }
            if let Ok(res) = self.client.get(&url).send().await {
                if res.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
        }
        Err(ApiError::Generation(
            "Timed out waiting for llama-server".to_string(),
        ))
    }
}

/// Finds `<models_dir>/<id with '/' as '__'>/*<TAG>*.gguf` for the quantization.
pub fn resolve_model_file(
    models_dir: &Path,
    model_identifier: &str,
    quantization: Quantization,
) -> Result<PathBuf, ApiError> {
    let dir_name = model_identifier.trim().replace('/', "__");
    let mut components = Path::new(&dir_name).components();
    let single_normal = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single_normal || dir_name.starts_with('.') || dir_name.contains('\\') {
        return Err(ApiError::BadRequest(format!(
            "invalid model identifier '{}'",
            model_identifier
        )));
    }
    let model_dir = models_dir.join(dir_name);
    let tag = quantization.gguf_tag().to_lowercase();

    let entries = std::fs::read_dir(&model_dir).map_err(|_| {
        ApiError::Generation(format!(
            "model '{}' not found under {}",
            model_identifier,
            models_dir.display()
        ))
    })?;

    let mut matches: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("")
                .to_lowercase();
            name.ends_with(".gguf") && name.contains(&tag)
        })
        .collect();
    matches.sort();

    matches.into_iter().next().ok_or_else(|| {
        ApiError::Generation(format!(
            "unsupported quantization '{}' for model '{}'",
            quantization, model_identifier
        ))
    })
}

#[async_trait]
impl ModelLoader for LlamaServerLoader {
    async fn load(
        &self,
        model_identifier: &str,
        quantization: Quantization,
        parameters: &GenerationParameters,
    ) -> Result<Arc<dyn InferenceEngine>, ApiError> {
        let model_path = resolve_model_file(&self.models_dir, model_identifier, quantization)?;
        let port = self.next_port.fetch_add(1, Ordering::SeqCst);

        let mut cmd = Command::new(&self.server_path);
        cmd.arg("-m").arg(&model_path);
        cmd.arg("--host").arg("127.0.0.1");
        cmd.arg("--port").arg(port.to_string());
        cmd.arg("-c").arg(parameters.n_ctx.to_string());
        if parameters.n_gpu_layers >= 0 {
            cmd.arg("-ngl").arg(parameters.n_gpu_layers.to_string());
        }
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            ApiError::Generation(format!(
                "Failed to spawn llama-server at {}: {}",
                self.server_path.display(),
                e
            ))
        })?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut reader = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    debug!("[llama-server] {}", line);
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    debug!("[llama-server-err] {}", line);
                }
            });
        }

        self.wait_for_health(port, &mut child).await?;
        info!(
            "llama-server for {} listening on port {} ({})",
            model_identifier,
            port,
            model_path.display()
        );

        Ok(Arc::new(LlamaServerEngine {
            completion_url: format!("http://127.0.0.1:{}/completion", port),
            client: self.client.clone(),
            _child: Mutex::new(child),
        }))
    }
}

struct LlamaServerEngine {
    completion_url: String,
    client: Client,
    _child: Mutex<Child>,
}

/// Request body for `/completion`. Sampling off means greedy decoding.
pub fn completion_body(prompt: &str, params: &GenerationParameters) -> Value {
    let (temperature, top_k) = if params.do_sample {
        (params.temperature, 40)
    } else {
        (0.0, 1)
    };

    json!({
        "prompt": prompt,
        "stream": false,
        "n_predict": params.max_new_tokens,
        "temperature": temperature,
        "top_k": top_k,
    })
}

#[async_trait]
impl InferenceEngine for LlamaServerEngine {
    async fn infer(&self, prompt: &str, params: &GenerationParameters) -> Result<String, ApiError> {
        let res = self
            .client
            .post(&self.completion_url)
            .json(&completion_body(prompt, params))
            .send()
            .await
            .map_err(ApiError::generation)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Generation(format!(
                "llama-server error {}: {}",
                status, text
            )));
        }

        let data: Value = res.json().await.map_err(ApiError::generation)?;
        Ok(data["content"].as_str().unwrap_or("").to_string())
    }
}
