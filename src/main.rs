//! Clientele - client statistics, segmentation and deduplication service.
//!
//! # API Endpoints
//!
//! - `POST /import` - Import clients and prestations CSV tables
//! - `GET /clients` - List clients (filters: `lifecycle`, `vip`)
//! - `GET /clients/:id` - A client and its prestations
//! - `POST /clients/refresh` - Recompute every client's stats
//! - `POST /prestations` - Record a prestation by hand
//! - `DELETE /prestations/:id` - Delete a prestation
//! - `POST /prestations/:id/transfer` - Move a prestation to another client
//! - `GET /duplicates` - Count duplicate prestations
//! - `POST /duplicates/clean` - Delete duplicate prestations
//! - `GET /health` - Health check

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use clientele::api::{AppState, router};
use clientele::config::AppConfig;
use clientele::storage::Storage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with environment filter
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("clientele=info".parse()?))
        .init();

    let config = AppConfig::from_env();

    info!(
        port = config.port,
        db_url = %config.database_url,
        max_batch_writes = config.storage.max_batch_writes,
        "Starting Clientele server"
    );

    // Initialize storage
    let storage = Storage::with_config(&config.database_url, config.storage).await?;
    info!("Database initialized");

    let app = router(AppState { storage });

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "Clientele is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
