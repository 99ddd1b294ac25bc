//! Main Entrypoint for the Parley API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging.
//! 3. Connecting the store (Postgres when configured, in memory otherwise).
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server, then closing every live call on shutdown.

use anyhow::Context;
use parley_api::{
    config::Config,
    db::Db,
    router::create_router,
    state::AppState,
    store::{MemoryStore, Store},
};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Store ---
    let store: Arc<dyn Store> = match &config.database_url {
        Some(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await
                .context("Failed to connect to database")?;
            let db = Db::new(pool);
            db.run_migrations().await?;
            info!("Database connection established and migrations are up-to-date.");
            Arc::new(db)
        }
        None => {
            warn!("DATABASE_URL is not set; credentials and transcripts are kept in memory.");
            Arc::new(MemoryStore::new())
        }
    };

    let app_state = Arc::new(AppState::new(store, config.clone()));
    let registry = app_state.registry.clone();

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        model = %config.chat_model,
        codec = %config.audio_codec,
        pbx = %config.pbx_url,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    registry.shutdown().await;
    info!("Server has shut down.");
    Ok(())
}
