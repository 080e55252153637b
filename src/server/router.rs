use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::server::handlers::{ask, collections, generate, health, retrieve};
use crate::state::AppState;

/// Creates the RAG API router.
///
/// - `GET /health`
/// - `POST /v1/retrieve`, `/v1/generate`, `/v1/ask`, `/v1/collections`
pub fn router(state: Arc<AppState>) -> Router {
    let cors_layer = build_cors_layer(&state.settings.server.cors_origins);
    Router::new()
        .route("/health", get(health::health))
        .route("/v1/retrieve", post(retrieve::retrieve))
        .route("/v1/generate", post(generate::generate))
        .route("/v1/ask", post(ask::ask))
        .route("/v1/collections", post(collections::create_collection))
        .with_state(state)
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allowed_origins = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin.trim()).ok())
        .collect::<Vec<_>>();

    let allow_origin = if allowed_origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(allowed_origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::ACCEPT, header::CONTENT_TYPE, header::AUTHORIZATION])
}
