//! Structured request/response logging for the proxy.
//!
//! `DataLogger::log` hands entries to a background writer over an unbounded
//! channel, so the relay never waits on storage.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::log_store::LogStore;
use crate::core::config::service::{is_sensitive_key, REDACT_PLACEHOLDER};

const MAX_WRITE_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestLog {
    pub method: String,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseLog {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
    pub streaming: bool,
    /// Set when the exchange ended abnormally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One completed request/response exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub request: RequestLog,
    #[serde(default)]
    pub response: Option<ResponseLog>,
}

impl LogEntry {
    pub fn new(
        method: &str,
        path: &str,
        headers: &HeaderMap,
        body: &[u8],
        user_id: Option<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            user_id,
            request: RequestLog {
                method: method.to_string(),
                path: path.to_string(),
                headers: redacted_headers(headers),
                body: body_value(body),
            },
            response: None,
        }
    }

    pub fn with_response(
        mut self,
        status_code: u16,
        headers: &HeaderMap,
        body: Value,
        streaming: bool,
        error: Option<String>,
    ) -> Self {
        self.response = Some(ResponseLog {
            status_code,
            headers: redacted_headers(headers),
            body,
            streaming,
            error,
        });
        self
    }

    /// `model` field of a JSON request body, if any.
    pub fn model(&self) -> Option<&str> {
        self.request.body.get("model").and_then(Value::as_str)
    }
}

/// `{user_id}_{model}_{YYYYMMDD}.jsonl`, or `{model}_{YYYYMMDD}.jsonl` when anonymous.
pub fn log_file_name(entry: &LogEntry) -> String {
    let model = entry
        .model()
        .filter(|m| !m.is_empty())
        .map(|m| m.replace('/', "_"))
        .unwrap_or_else(|| "unknown".to_string());
    let date = entry.timestamp.format("%Y%m%d");

    match entry.user_id.as_deref().filter(|id| !id.is_empty()) {
        Some(user_id) => format!("{}_{}_{}.jsonl", user_id.replace('/', "_"), model, date),
        None => format!("{}_{}.jsonl", model, date),
    }
}

/// Header map as strings, with credential-bearing values masked.
pub fn redacted_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (name, value) in headers {
        let key = name.as_str().to_string();
        let text = if is_sensitive_key(&key) {
            REDACT_PLACEHOLDER.to_string()
        } else {
            String::from_utf8_lossy(value.as_bytes()).into_owned()
        };
        out.insert(key, text);
    }
    out
}

/// JSON when the bytes parse as JSON, else lossy UTF-8 text; null when empty.
pub fn body_value(body: &[u8]) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

#[derive(Clone)]
pub struct DataLogger {
    tx: mpsc::UnboundedSender<LogEntry>,
}

impl DataLogger {
    /// Starts the writer task. It exits once every `DataLogger` clone is dropped
    /// and the queue is drained.
    pub fn spawn(store: Arc<dyn LogStore>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogEntry>();
        let handle = tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                write_with_retry(store.as_ref(), &entry).await;
            }
        });
        (Self { tx }, handle)
    }

    pub fn log(&self, entry: LogEntry) {
        if let Err(err) = self.tx.send(entry) {
            error!(
                "Log writer is gone; dropping entry for {}",
                err.0.request.path
            );
        }
    }
}

/// Writes one entry, retrying with backoff. Returns whether it was stored.
pub async fn write_with_retry(store: &dyn LogStore, entry: &LogEntry) -> bool {
    let file_name = log_file_name(entry);
    let mut line = match serde_json::to_vec(entry) {
        Ok(line) => line,
        Err(err) => {
            error!("Failed to serialize log entry: {}", err);
            return false;
        }
    };
    line.push(b'\n');

    for attempt in 1..=MAX_WRITE_ATTEMPTS {
        match store.append(&file_name, &line).await {
            Ok(()) => {
                debug!("Logged {} {} to {}", entry.request.method, entry.request.path, file_name);
                return true;
            }
            Err(err) if attempt < MAX_WRITE_ATTEMPTS => {
                warn!(
                    "Log write to {} failed (attempt {}/{}): {}",
                    file_name, attempt, MAX_WRITE_ATTEMPTS, err
                );
                tokio::time::sleep(RETRY_BASE_DELAY * 2u32.pow(attempt - 1)).await;
            }
            Err(err) => {
                error!(
                    "Error logging to storage ({}), entry dropped after {} attempts: {}",
                    file_name, MAX_WRITE_ATTEMPTS, err
                );
            }
        }
    }
    false
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::errors::ApiError;
    use async_trait::async_trait;
    use axum::http::HeaderValue;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records appended lines; fails the first `failures` appends.
    #[derive(Default)]
    pub(crate) struct MemoryLogStore {
        pub lines: Mutex<Vec<(String, String)>>,
        pub failures: AtomicUsize,
    }

    impl MemoryLogStore {
        pub fn entries(&self) -> Vec<(String, LogEntry)> {
            self.lines
                .lock()
                .unwrap()
                .iter()
                .map(|(file, line)| (file.clone(), serde_json::from_str(line).unwrap()))
                .collect()
        }
    }

    #[async_trait]
    impl LogStore for MemoryLogStore {
        fn describe(&self) -> String {
            "memory".to_string()
        }

        async fn append(&self, file_name: &str, line: &[u8]) -> Result<(), ApiError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(ApiError::ServiceUnavailable);
            }
            self.lines.lock().unwrap().push((
                file_name.to_string(),
                String::from_utf8_lossy(line).trim_end().to_string(),
            ));
            Ok(())
        }
    }

    fn entry_at(body: &[u8], user_id: Option<&str>) -> LogEntry {
        let mut entry = LogEntry::new(
            "POST",
            "/v1/chat/completions",
            &HeaderMap::new(),
            body,
            user_id.map(str::to_string),
        );
        entry.timestamp = Utc.with_ymd_and_hms(2025, 3, 9, 23, 59, 0).unwrap();
        entry
    }

    #[test]
    fn file_name_depends_on_user_model_and_day() {
        let body = br#"{"model":"openai/gpt-4o","messages":[]}"#;
        assert_eq!(
            log_file_name(&entry_at(body, Some("u1"))),
            "u1_openai_gpt-4o_20250309.jsonl"
        );
        assert_eq!(
            log_file_name(&entry_at(body, None)),
            "openai_gpt-4o_20250309.jsonl"
        );
        assert_eq!(
            log_file_name(&entry_at(b"not json", None)),
            "unknown_20250309.jsonl"
        );
    }

    #[test]
    fn authorization_headers_are_redacted() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer sk-secret"));
        headers.insert("x-api-key", HeaderValue::from_static("abc"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let redacted = redacted_headers(&headers);
        assert_eq!(redacted["authorization"], REDACT_PLACEHOLDER);
        assert_eq!(redacted["x-api-key"], REDACT_PLACEHOLDER);
        assert_eq!(redacted["content-type"], "application/json");
    }

    #[test]
    fn bodies_keep_json_or_fall_back_to_text() {
        assert_eq!(body_value(b""), Value::Null);
        assert_eq!(body_value(br#"{"a":1}"#)["a"], 1);
        assert_eq!(body_value(b"plain"), Value::String("plain".to_string()));
    }

    #[tokio::test]
    async fn write_retries_then_succeeds() {
        let store = MemoryLogStore::default();
        store.failures.store(2, Ordering::SeqCst);

        assert!(write_with_retry(&store, &entry_at(b"{}", None)).await);
        assert_eq!(store.entries().len(), 1);
    }

    #[tokio::test]
    async fn write_gives_up_after_three_attempts() {
        let store = MemoryLogStore::default();
        store.failures.store(3, Ordering::SeqCst);

        assert!(!write_with_retry(&store, &entry_at(b"{}", None)).await);
        assert!(store.entries().is_empty());
    }

    #[tokio::test]
    async fn background_writer_drains_queue_in_order() {
        let store = Arc::new(MemoryLogStore::default());
        let (logger, handle) = DataLogger::spawn(store.clone());

        for i in 0..3 {
            let body = format!(r#"{{"model":"m","n":{}}}"#, i);
            logger.log(entry_at(body.as_bytes(), Some("u")));
        }
        drop(logger);
        handle.await.unwrap();

        let entries = store.entries();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|(file, _)| file == "u_m_20250309.jsonl"));
        let order: Vec<i64> = entries
            .iter()
            .map(|(_, e)| e.request.body["n"].as_i64().unwrap())
            .collect();
        assert_eq!(order, vec![0, 1, 2]);
    }
}
