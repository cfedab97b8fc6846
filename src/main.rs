use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tally::access::AccessGate;
use tally::api::{self, AppState};
use tally::config::{Config, GeoProvider};
use tally::cursor::CursorSigner;
use tally::storage;
use tally::tracking::{GeoResolver, TrackingEngine};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tally=info")),
        )
        .init();

    let config = Config::from_env()?;
    info!("Loaded configuration");

    info!("Initializing database...");
    let storage = storage::connect(&config.database).await?;
    info!("Database initialized successfully");

    let geo = GeoResolver::from_config(&config.geo).context("Failed to set up geolocation")?;
    match config.geo.provider {
        GeoProvider::IpApi => info!(
            "🌍 Geolocation via {} (timeout {}ms)",
            config.geo.api_url, config.geo.timeout_ms
        ),
        GeoProvider::Maxmind => info!(
            "🌍 Geolocation via MaxMind database {}",
            config.geo.mmdb_path.as_deref().unwrap_or_default()
        ),
        GeoProvider::None => info!("🌍 Geolocation disabled"),
    }

    if config.pagination.cursor_hmac_secret.is_none() {
        info!("CURSOR_HMAC_SECRET not set, visit-list cursors will not survive a restart");
    }

    let engine = Arc::new(TrackingEngine::new(
        Arc::clone(&storage),
        geo,
        &config.tracking,
    ));
    let state = Arc::new(AppState {
        storage: Arc::clone(&storage),
        engine,
        gate: Arc::new(AccessGate::new(Arc::clone(&storage))),
        cursor: CursorSigner::new(config.pagination.cursor_hmac_secret.as_deref()),
    });

    let app = api::create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🚀 Server listening on http://{}", addr);
    info!("   - Tracking endpoint at http://{}/api/track", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
