// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensorhub Gateway - REST API over stored sensor readings
//!
//! Serves historical readings from the SQLite database written by
//! `sensorhub-ingest`. With `--ingest` the gateway also runs the MQTT
//! ingestion pipeline in-process against the same database.
//!
//! # Usage
//!
//! ```bash
//! # Start gateway on default port 8080
//! sensorhub-gateway
//!
//! # Custom port and database, ingesting in the same process
//! sensorhub-gateway --port 9000 --db /var/lib/sensorhub/readings.db --ingest
//! ```
//!
//! # Endpoints
//!
//! - `GET /api/sensor-data` - Readings of a device (optionally one sensor type, time range)
//! - `GET /api/sensor-data/devices` - Devices with stored readings
//! - `GET /api/v1/health` - Health check

mod handlers;
mod routes;

use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use sensorhub_ingest::{Config, IngestService, QueryService, SqliteStore};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Sensorhub REST API Gateway
#[derive(Parser, Debug)]
#[command(name = "sensorhub-gateway")]
#[command(about = "Sensorhub REST API Gateway")]
#[command(version)]
struct Args {
    /// HTTP server port
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Database path (overrides the configuration file)
    #[arg(short, long)]
    db: Option<String>,

    /// Ingestion configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Also run the MQTT ingestion pipeline in this process
    #[arg(long)]
    ingest: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Shared application state
pub struct AppState {
    queries: QueryService<SqliteStore>,
}

impl AppState {
    pub fn new(queries: QueryService<SqliteStore>) -> Self {
        Self { queries }
    }

    pub fn queries(&self) -> &QueryService<SqliteStore> {
        &self.queries
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(db) = &args.db {
        config.storage.database = db.clone();
    }
    config.validate()?;

    let store = SqliteStore::new(&config.storage.database)?;
    let database = config.storage.database.clone();

    let queries = if args.ingest {
        let service = IngestService::new(config, store);
        let queries = service.query_service();
        tokio::spawn(async move {
            if let Err(e) = service.run().await {
                tracing::error!("Ingestion stopped: {:#}", e);
            }
        });
        queries
    } else {
        QueryService::new(Arc::new(store))
    };

    let state = Arc::new(AppState::new(queries));
    let app = build_router(state);

    // Start server
    let addr = format!("{}:{}", args.bind, args.port);
    info!("Sensorhub Gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("HTTP server: http://{}", addr);
    info!("Database: {}", database);
    if args.ingest {
        info!("In-process ingestion enabled");
    }

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down...");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {}", e);
    }
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::api_routes())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
