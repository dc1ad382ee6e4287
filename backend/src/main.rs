use anyhow::Context;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use stream_sql_backend::api;
use stream_sql_backend::config::Config;
use stream_sql_backend::engine::{EngineContext, LocalJobEngine};
use stream_sql_backend::services::{MappingCatalog, SqlService};
use stream_sql_backend::storage::SqliteStorage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with_ansi(config.logging.style != "never")
        .init();

    let member_id = config.member_id()?;
    info!("Starting member {} on {}", member_id, config.server_address());

    // Initialize the mapping catalog
    let storage = Arc::new(SqliteStorage::new(&config.catalog.url).await.map_err(|e| {
        error!("Failed to initialize catalog: {}", e);
        e
    })?);
    let catalog = Arc::new(MappingCatalog::new(storage));

    let context = EngineContext::new(member_id, Duration::from_millis(config.engine.idle_poll_millis));
    let engine = Arc::new(LocalJobEngine::new(context));
    let service = Arc::new(SqlService::new(
        catalog,
        engine,
        config.engine.result_buffer_capacity,
    ));
    service.spawn_idle_result_reaper(Duration::from_millis(config.engine.result_idle_timeout_millis));

    // Create router with state
    let app: Router = api::routes::create_router_with_state(service, config.clone());

    // Start server
    let addr: SocketAddr = config
        .server_address()
        .parse()
        .with_context(|| format!("Invalid server address {}", config.server_address()))?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
