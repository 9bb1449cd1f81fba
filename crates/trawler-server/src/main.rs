use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use trawler_core::{PipelineConfig, QueueClient};
use trawler_db::{Database, DatabaseConfig};
use trawler_server::routes;
use trawler_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("trawler=info".parse()?))
        .with_target(false)
        .init();

    let api_key = std::env::var("TRAWLER_API_KEY").context("TRAWLER_API_KEY must be set")?;
    let port = std::env::var("TRAWLER_SERVER_PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{port}");

    let config = PipelineConfig::from_env()?;
    let db = Database::connect(&DatabaseConfig::for_queue(&config.queue)?).await?;
    db.migrate().await?;

    let state = Arc::new(AppState::new(QueueClient::new(db.queue(&config.queue)), api_key));

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!(
        queue = %config.queue.name,
        region = config.queue.region.as_deref().unwrap_or("-"),
        "Starting server on {addr}"
    );
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}
