use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;

use llmaven_backend::core;
use llmaven_backend::core::config::{AppPaths, ConfigService};
use llmaven_backend::server;
use llmaven_backend::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let paths = Arc::new(AppPaths::new());
    core::logging::init(&paths.log_dir, "server.log");

    let config = ConfigService::new(paths.clone());
    let settings = config
        .load_settings()
        .with_context(|| format!("Failed to load {}", config.config_path().display()))?;
    let bind_addr = format!("{}:{}", settings.server.host, settings.server.port);
    tracing::debug!("Effective config: {}", config.redacted_settings(&settings));

    let state = AppState::initialize(&paths, settings)?;

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    let addr = listener.local_addr()?;
    tracing::info!("RAG API listening on {}", addr);

    let app: Router = server::router::router(state);
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
