use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, Uri};
use axum::response::Response;

use crate::core::errors::ApiError;
use crate::state::ProxyState;

/// Relays any `/v1/*` request upstream, authenticating first when enabled.
pub async fn proxy_v1(
    State(state): State<Arc<ProxyState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let user_id = match &state.auth {
        Some(auth) => Some(auth.authenticate(&headers)?.user_id),
        None => None,
    };

    let path = uri.path();
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or(path);

    state
        .relay
        .relay(method, path, path_and_query, &headers, body, user_id)
        .await
}
