use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::{AppState, ProxyState};

pub async fn health(State(_state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn proxy_health(State(state): State<Arc<ProxyState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "downstream": state.relay.base_url(),
    }))
}

pub async fn proxy_info(State(state): State<Arc<ProxyState>>) -> impl IntoResponse {
    Json(json!({
        "service": "llmaven-proxy",
        "version": env!("CARGO_PKG_VERSION"),
        "auth_enabled": state.auth.is_some(),
        "endpoints": {
            "health": "/health",
            "api": "/v1/*",
        },
    }))
}
