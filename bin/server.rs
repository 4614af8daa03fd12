// API Metrics - Scrape Server
// Serves the api_transactions gauge for a Prometheus collector.
//
// Environment: API_METRICS_DATABASE, API_METRICS_LISTEN, API_METRICS_PATH,
// API_METRICS_WINDOW_SECS, API_METRICS_SCRAPE_TIMEOUT_SECS

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

use api_metrics::{open_database, router, AppState, Config, SqliteRepository};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    info!("API metrics server {} starting", api_metrics::VERSION);

    let config = Config::from_env()?;

    let conn = open_database(&config.database_path)?;
    // Bound lock waits so a busy writer surfaces as a failed scrape
    conn.busy_timeout(config.scrape_timeout)?;
    info!(path = %config.database_path.display(), "database opened");

    let state = AppState::from_config(Arc::new(SqliteRepository::new(conn)), &config);
    let app = router(state, &config.metrics_path);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.listen_addr))?;

    info!(
        "serving http://{}{} (window {}s, timeout {:?})",
        config.listen_addr,
        config.metrics_path,
        config.window.num_seconds(),
        config.scrape_timeout
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
