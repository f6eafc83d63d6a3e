//! Tally telemetry ingest server.
//!
//! Accepts node telemetry over WebSocket at `/submit`, runs one session per
//! node and feeds their events to the registry.

mod config;
mod geo;
mod ingest;
mod logging;
mod registry;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tally_core::traits::{Locator, NoopLocator};
use tally_node::IdGenerator;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::Args;
use crate::ingest::AppState;
use crate::registry::Registry;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Args::parse().into_config()?;
    logging::init_logging(&config.log_level, &config.log_format);

    info!("Tally ingest server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        bind = %config.bind,
        geo = config.geo_url.as_deref().unwrap_or("disabled"),
        cache_heights = config.session.cache_heights,
        idle_timeout_ms = config.session.idle_timeout_ms,
        "configuration loaded"
    );

    let locator: Arc<dyn Locator> = match &config.geo_url {
        Some(url) => Arc::new(geo::HttpLocator::new(url)?),
        None => Arc::new(NoopLocator),
    };

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let registry = Arc::new(Registry::default());
    let registry_task = tokio::spawn(Arc::clone(&registry).run(events_rx));

    let state = AppState {
        session: Arc::new(config.session.clone()),
        ids: Arc::new(IdGenerator::new()),
        locator,
        registry,
        events: events_tx,
    };

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!("listening on ws://{}/submit", config.bind);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("received Ctrl+C, shutting down...");
    };

    axum::serve(
        listener,
        ingest::router(state).into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    registry_task.abort();
    info!("Tally ingest server shutdown complete");
    Ok(())
}
