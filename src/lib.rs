//! WineGuard -- sustained-incident detection for cold-chain shipments.
//!
//! Readings for many assets stream in; per asset and per detection channel
//! the detector separates sustained anomalies from one-off spikes and emits
//! opened/closed incident events, which the ingest pipeline persists.

pub mod api;
pub mod config;
pub mod detect;
pub mod ingest;
pub mod simulate;
pub mod storage;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::WineguardConfig;
use crate::ingest::Pipeline;

/// Compose detector, storage and pipeline from configuration.
pub fn build_pipeline(config: &WineguardConfig) -> Result<Pipeline> {
    tracing::info!(db_path = %config.server.db_path, "Initializing database");
    let pool = storage::open_pool(&config.server.db_path)?;

    let detector = config
        .detector
        .build()
        .context("invalid detector configuration")?;
    tracing::info!(
        channels = ?detector.channels().iter().map(|c| c.label.as_str()).collect::<Vec<_>>(),
        "Detector ready"
    );

    Ok(Pipeline::new(Arc::new(detector), pool, config.ingest.clone()))
}

/// Start the WineGuard daemon: ingest API backed by one shared detector.
pub async fn serve(config: &WineguardConfig) -> Result<()> {
    let pipeline = build_pipeline(config)?;
    let app = api::router(api::state::AppState::new(pipeline));

    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.server.bind))?;

    tracing::info!(%addr, "WineGuard listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
