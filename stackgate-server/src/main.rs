//! Production-ready stackgate content server.
//!
//! # Usage
//!
//! ```bash
//! # Run with default config (config.toml in current directory)
//! cargo run -p stackgate-server --release
//!
//! # Run with custom config path
//! stackgate-server --config /path/to/config.toml
//! CONFIG=/path/to/config.toml stackgate-server
//!
//! # Configure logging level
//! RUST_LOG=debug stackgate-server
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG`: path to TOML configuration file (default: `config.toml`)
//! - `HOST`, `PORT`: override bind address (default: `0.0.0.0:8080`)
//! - `NETWORK`, `FACILITATOR_URL`, `DATABASE_PATH`: override the file values
//! - `RUST_LOG`: log level filter (default: `info`)

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::{HeaderName, Method};
use axum::{Json, Router};
use clap::Parser;
use stackgate::store::{ListingStore, MemoryStore, PurchaseLedger};
use stackgate_http::constants::{PAYMENT_REQUIRED_HEADER, PAYMENT_RESPONSE_HEADER};
use stackgate_http::server::{AccessGate, AppState, router};
use tower_http::cors;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use stackgate_server::config::{ServerConfig, StorageBackend};
use stackgate_server::store::SqliteStore;

/// Serves listing content behind x402 Stacks payments.
#[derive(Parser, Debug)]
#[command(name = "stackgate-server", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, short = 'c', env = "CONFIG", default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!("Server failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::load(&cli.config)?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        network = %config.network,
        facilitator = %config.facilitator.url,
        storage = ?config.storage.backend,
        "Loaded configuration"
    );

    let requirements = config.requirement_builder()?;
    let facilitator = config.facilitator_client()?;
    let (listings, ledger) = open_storage(&config)?;

    let gate = AccessGate::new(listings, ledger, Arc::new(facilitator), requirements)
        .with_bypass_policy(config.bypass_policy());
    let mut state = AppState::new(Arc::new(gate));
    if let Some(url) = config.base_url()? {
        state = state.with_public_base_url(url);
    } else {
        tracing::warn!("public_base_url is not set; resource URLs will use the Host header");
    }
    if let (Some(name), Some(description)) = (&config.service.name, &config.service.description) {
        state = state.with_service_info(name, description);
    }

    let app = Router::new()
        .merge(router(state))
        .route("/health", axum::routing::get(health))
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET])
                .allow_headers(cors::Any)
                .expose_headers([
                    HeaderName::from_static(PAYMENT_REQUIRED_HEADER),
                    HeaderName::from_static(PAYMENT_RESPONSE_HEADER),
                ]),
        );

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Stackgate listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Stackgate shut down gracefully");
    Ok(())
}

type Storage = (Arc<dyn ListingStore>, Arc<dyn PurchaseLedger>);

/// Opens the configured backend and seeds it with the configured listings.
fn open_storage(config: &ServerConfig) -> Result<Storage, Box<dyn std::error::Error>> {
    match config.storage.backend {
        StorageBackend::Sqlite => {
            let store = Arc::new(SqliteStore::open(&config.storage.path)?);
            for listing in &config.listings {
                store.upsert_listing(listing)?;
            }
            tracing::info!(
                path = %config.storage.path.display(),
                seeded = config.listings.len(),
                "Opened SQLite store"
            );
            let listings: Arc<dyn ListingStore> = store.clone();
            let ledger: Arc<dyn PurchaseLedger> = store;
            Ok((listings, ledger))
        }
        StorageBackend::Memory => {
            let store = Arc::new(MemoryStore::new());
            for listing in &config.listings {
                store.upsert_listing(listing.clone());
            }
            tracing::warn!(
                seeded = config.listings.len(),
                "Using in-memory storage; purchases are lost on restart"
            );
            let listings: Arc<dyn ListingStore> = store.clone();
            let ledger: Arc<dyn PurchaseLedger> = store;
            Ok((listings, ledger))
        }
    }
}

/// Health check endpoint.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Waits for Ctrl-C or SIGTERM (Unix) to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl-C, shutting down..."),
        () = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
