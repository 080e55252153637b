//! Path-agnostic upstream relay with streaming-aware logging.
//!
//! Streaming responses are pumped chunk by chunk from upstream to the caller
//! through a bounded channel while a copy accumulates for the log entry.

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use super::data_log::{body_value, DataLogger, LogEntry};
use crate::core::config::ProxySettings;
use crate::core::errors::ApiError;

pub const STREAMING_MARKER: &str = "text/event-stream";
const STREAM_BUFFER: usize = 32;

const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub base_url: String,
    pub api_key: String,
    /// Bounds connect-to-headers, a buffered body read, and each streamed chunk.
    pub timeout: Duration,
}

impl RelayConfig {
    pub fn from_settings(settings: &ProxySettings) -> Self {
        Self {
            base_url: settings.upstream_base_url.trim_end_matches('/').to_string(),
            api_key: settings.upstream_api_key.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }
}

#[derive(Clone)]
pub struct ProxyRelay {
    client: Client,
    config: RelayConfig,
    logger: DataLogger,
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Inbound headers minus host, credentials, length and hop-by-hop headers,
/// plus the proxy's own upstream bearer credential.
pub fn outbound_headers(
    inbound: &HeaderMap,
    api_key: &str,
    has_body: bool,
) -> Result<HeaderMap, ApiError> {
    let mut headers = HeaderMap::new();
    for (name, value) in inbound {
        if name == header::HOST
            || name == header::AUTHORIZATION
            || name == header::CONTENT_LENGTH
            || is_hop_by_hop(name)
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key))
        .map_err(|_| ApiError::Internal("upstream API key is not a valid header value".to_string()))?;
    headers.insert(header::AUTHORIZATION, bearer);
    if has_body && !headers.contains_key(header::CONTENT_TYPE) {
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    Ok(headers)
}

fn response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in upstream {
        if name == header::CONTENT_LENGTH || is_hop_by_hop(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

pub fn is_streaming(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.contains(STREAMING_MARKER))
        .unwrap_or(false)
}

impl ProxyRelay {
    pub fn new(config: RelayConfig, logger: DataLogger) -> Self {
        Self {
            client: Client::new(),
            config,
            logger,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Forwards one request upstream and returns the caller-facing response.
    ///
    /// `path` is the sub-path logged; `path_and_query` is what gets forwarded.
    pub async fn relay(
        &self,
        method: Method,
        path: &str,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Bytes,
        user_id: Option<String>,
    ) -> Result<Response, ApiError> {
        let entry = LogEntry::new(method.as_str(), path, headers, &body, user_id);
        let url = format!("{}{}", self.config.base_url, path_and_query);
        let outbound = outbound_headers(headers, &self.config.api_key, !body.is_empty())?;

        let request = self
            .client
            .request(method, &url)
            .headers(outbound)
            .body(body)
            .send();

        let upstream = match tokio::time::timeout(self.config.timeout, request).await {
            Ok(Ok(res)) => res,
            Ok(Err(err)) => {
                let failure = if err.is_timeout() {
                    ApiError::Timeout(err.to_string())
                } else {
                    ApiError::Relay(err.to_string())
                };
                self.log_failure(entry, &failure);
                return Err(failure);
            }
            Err(_) => {
                let failure = ApiError::Timeout(format!("no response from {} within timeout", url));
                self.log_failure(entry, &failure);
                return Err(failure);
            }
        };

        let status = upstream.status();
        let upstream_headers = upstream.headers().clone();
        debug!("{} {} -> {}", entry.request.method, url, status);

        if is_streaming(&upstream_headers) {
            Ok(self.stream_response(entry, status, upstream_headers, upstream))
        } else {
            self.buffered_response(entry, status, upstream_headers, upstream)
                .await
        }
    }

    async fn buffered_response(
        &self,
        entry: LogEntry,
        status: StatusCode,
        upstream_headers: HeaderMap,
        upstream: reqwest::Response,
    ) -> Result<Response, ApiError> {
        let content = match tokio::time::timeout(self.config.timeout, upstream.bytes()).await {
            Ok(Ok(content)) => content,
            Ok(Err(err)) => {
                let failure = ApiError::Relay(err.to_string());
                self.log_failure(entry, &failure);
                return Err(failure);
            }
            Err(_) => {
                let failure = ApiError::Timeout("upstream body read timed out".to_string());
                self.log_failure(entry, &failure);
                return Err(failure);
            }
        };

        self.logger.log(entry.with_response(
            status.as_u16(),
            &upstream_headers,
            body_value(&content),
            false,
            None,
        ));

        build_response(status, &upstream_headers, Body::from(content))
    }

    fn stream_response(
        &self,
        entry: LogEntry,
        status: StatusCode,
        upstream_headers: HeaderMap,
        upstream: reqwest::Response,
    ) -> Response {
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(STREAM_BUFFER);
        let logger = self.logger.clone();
        let chunk_timeout = self.config.timeout;
        let log_headers = upstream_headers.clone();

        tokio::spawn(async move {
            let mut chunks = upstream.bytes_stream();
            let mut collected: Vec<u8> = Vec::new();
            let mut failure: Option<String> = None;
            let mut caller_gone = false;

            loop {
                let next = tokio::select! {
                    _ = tx.closed() => {
                        caller_gone = true;
                        break;
                    }
                    next = tokio::time::timeout(chunk_timeout, chunks.next()) => next,
                };

                match next {
                    Ok(Some(Ok(chunk))) => {
                        collected.extend_from_slice(&chunk);
                        if tx.send(Ok(chunk)).await.is_err() {
                            caller_gone = true;
                            break;
                        }
                    }
                    Ok(Some(Err(err))) => {
                        failure = Some(format!("upstream stream error: {}", err));
                        break;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        failure = Some("upstream stream timed out".to_string());
                        break;
                    }
                }
            }

            if caller_gone {
                warn!("Caller disconnected mid-stream after {} bytes", collected.len());
            }
            let error = failure
                .clone()
                .or_else(|| caller_gone.then(|| "caller disconnected".to_string()));
            let text = String::from_utf8_lossy(&collected).into_owned();
            logger.log(entry.with_response(
                status.as_u16(),
                &log_headers,
                Value::String(text),
                true,
                error,
            ));

            if let Some(message) = failure {
                warn!("{}", message);
                let _ = tx.send(Err(std::io::Error::other(message))).await;
            }
        });

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers(&upstream_headers);
        response
    }

    fn log_failure(&self, entry: LogEntry, failure: &ApiError) {
        let status = failure.status_code().as_u16();
        self.logger.log(entry.with_response(
            status,
            &HeaderMap::new(),
            Value::Null,
            false,
            Some(failure.to_string()),
        ));
    }
}

fn build_response(
    status: StatusCode,
    upstream_headers: &HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    let mut builder = Response::builder().status(status);
    if let Some(headers) = builder.headers_mut() {
        *headers = response_headers(upstream_headers);
    }
    builder.body(body).map_err(ApiError::internal)
}
