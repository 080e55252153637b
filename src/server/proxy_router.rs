use axum::extract::DefaultBodyLimit;
use axum::routing::{any, get};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::server::handlers::{health, proxy};
use crate::state::ProxyState;

/// Creates the relay proxy router: `GET /`, `GET /health`, and any method on `/v1/*`.
pub fn router(state: Arc<ProxyState>) -> Router {
    let body_limit = state.max_body_bytes;
    Router::new()
        .route("/", get(health::proxy_info))
        .route("/health", get(health::proxy_health))
        .route("/v1/*path", any(proxy::proxy_v1))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}
