// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensorhub Ingestion Service CLI
//!
//! Subscribes to sensor topics and persists changed readings.
//!
//! # Usage
//!
//! ```bash
//! # Run against the default public broker and sensorhub.db
//! sensorhub-ingest
//!
//! # Custom broker and database
//! sensorhub-ingest --host 192.168.1.10 --db /var/lib/sensorhub/readings.db
//!
//! # Using configuration file
//! sensorhub-ingest --config sensorhub.toml
//!
//! # Query stored readings
//! sensorhub-ingest query --device harbaoui --sensor-type temperature \
//!     --start 2025-03-01T00:00:00 --end 2025-03-02T00:00:00
//! ```

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use sensorhub_ingest::{
    Config, IngestService, MemoryStore, QueryService, ReadingStore, SqliteStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Timestamp format accepted on the command line
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Parser, Debug)]
#[command(name = "sensorhub-ingest")]
#[command(about = "Sensorhub Ingestion Service - change-only persistence of sensor readings", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database path (SQLite file)
    #[arg(short, long)]
    db: Option<String>,

    /// Keep readings in memory only (nothing survives the process)
    #[arg(long, conflicts_with = "db")]
    memory: bool,

    /// MQTT broker host
    #[arg(long)]
    host: Option<String>,

    /// MQTT broker port
    #[arg(long)]
    port: Option<u16>,

    /// MQTT client id (derived from the process id when omitted)
    #[arg(long)]
    client_id: Option<String>,

    /// Topic filter to subscribe to
    #[arg(short, long)]
    topics: Option<String>,

    /// Concurrent message workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print stored readings as JSON
    Query {
        /// Device identifier
        #[arg(long)]
        device: String,

        /// Sensor type (all types when omitted)
        #[arg(long)]
        sensor_type: Option<String>,

        /// Range start (yyyy-MM-ddTHH:mm:ss), needs --end
        #[arg(long, value_parser = parse_timestamp)]
        start: Option<NaiveDateTime>,

        /// Range end (yyyy-MM-ddTHH:mm:ss), needs --start
        #[arg(long, value_parser = parse_timestamp)]
        end: Option<NaiveDateTime>,
    },
    /// List devices with stored readings
    Devices,
    /// Show statistics
    Stats,
    /// Clear all stored readings
    Clear {
        /// Confirm deletion
        #[arg(long)]
        confirm: bool,
    },
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "sensorhub.toml")]
        output: PathBuf,
    },
    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .map_err(|e| format!("expected yyyy-MM-ddTHH:mm:ss: {}", e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Commands that need no store
    match &args.command {
        Some(Commands::GenConfig { output }) => return cmd_gen_config(output),
        Some(Commands::Validate { config }) => return cmd_validate(config),
        _ => {}
    }

    let config = build_config(&args)?;

    if args.memory {
        tracing::warn!("Running with in-memory store: readings are lost on exit");
        return run(args.command, config, MemoryStore::new()).await;
    }

    let store = SqliteStore::new(&config.storage.database)?;
    run(args.command, config, store).await
}

fn build_config(args: &Args) -> Result<Config> {
    let base = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => Config::default(),
    };

    let mut builder = Config::builder().base(base);
    if let Some(db) = &args.db {
        builder = builder.database(db);
    }
    if let Some(host) = &args.host {
        builder = builder.host(host);
    }
    if let Some(port) = args.port {
        builder = builder.port(port);
    }
    if let Some(client_id) = &args.client_id {
        builder = builder.client_id(client_id);
    }
    if let Some(topics) = &args.topics {
        builder = builder.topic_filter(topics);
    }
    if let Some(workers) = args.workers {
        builder = builder.workers(workers);
    }

    let config = builder.build();
    config.validate()?;
    Ok(config)
}

async fn run<S: ReadingStore + 'static>(
    command: Option<Commands>,
    config: Config,
    store: S,
) -> Result<()> {
    if let Some(cmd) = command {
        return handle_command(cmd, store);
    }

    tracing::info!("Sensorhub ingestion starting...");
    tracing::info!("  Database: {}", config.storage.database);

    let service = IngestService::new(config, store);

    tokio::select! {
        result = service.run() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down...");
            Ok(())
        }
    }
}

fn handle_command<S: ReadingStore>(cmd: Commands, store: S) -> Result<()> {
    let store = Arc::new(store);
    let queries = QueryService::new(Arc::clone(&store));

    match cmd {
        Commands::Query {
            device,
            sensor_type,
            start,
            end,
        } => {
            if start.is_some() != end.is_some() {
                tracing::warn!("Only one of --start/--end given, ignoring the time range");
            }
            let readings = queries.lookup(&device, sensor_type.as_deref(), start, end)?;
            if readings.is_empty() {
                match sensor_type.as_deref().filter(|t| !t.is_empty()) {
                    Some(t) => eprintln!("No data found for device {} and sensor type {}", device, t),
                    None => eprintln!("No data found for device {}", device),
                }
            } else {
                println!("{}", serde_json::to_string_pretty(&readings)?);
            }
        }
        Commands::Devices => {
            let devices = queries.devices()?;
            println!("Devices with readings:");
            for device in &devices {
                let count = queries.query_by_device(device, None, None)?.len();
                println!("  {} ({} readings)", device, count);
            }
        }
        Commands::Stats => {
            println!("Devices: {}", queries.devices()?.len());
            println!("Total readings stored: {}", store.count()?);
        }
        Commands::Clear { confirm } => {
            if confirm {
                let count = store.count()?;
                store.clear()?;
                println!("Cleared {} readings.", count);
            } else {
                println!("Use --confirm to actually delete readings.");
            }
        }
        Commands::GenConfig { .. } | Commands::Validate { .. } => {}
    }

    Ok(())
}

fn cmd_gen_config(output: &PathBuf) -> Result<()> {
    let config = Config::default();
    let toml_str = toml::to_string_pretty(&config)?;

    let content = format!(
        r#"# Sensorhub Ingestion Configuration
# Generated by sensorhub-ingest gen-config

{}
"#,
        toml_str
    );

    std::fs::write(output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(path: &PathBuf) -> Result<()> {
    let config = Config::from_file(path)?;

    println!("Configuration valid!");
    println!();
    println!("Broker: {}:{}", config.mqtt.host, config.mqtt.port);
    println!("Topics: {}", config.mqtt.topic_filter);
    println!("Database: {}", config.storage.database);
    println!("Workers: {}", config.pipeline.workers);
    Ok(())
}
