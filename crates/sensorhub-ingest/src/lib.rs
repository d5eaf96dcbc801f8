// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensorhub Ingestion Service
//!
//! Ingests readings published by sensor nodes over MQTT, drops values that
//! did not change, persists the rest, and answers historical queries.
//!
//! # Features
//!
//! - **Change-only persistence** -- Per-signal last-value cache, safe under concurrent delivery
//! - **Structured and scalar payloads** -- `sensors_data` JSON objects fan out into one signal per field
//! - **SQLite Backend** -- Durable store with a single parameterized query path
//! - **Standalone mode** -- Feed the pipeline through a channel, no broker needed
//!
//! # Architecture
//!
//! ```text
//! IngestService
//! +-- MqttSubscriber   (broker -> channel)
//! +-- IngestPipeline   (topic -> payload -> ChangeCache -> ReadingWriter)
//! +-- QueryService     (ReadingFilter -> ReadingStore)
//! +-- ReadingStore     (SQLite or in-memory backend)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use sensorhub_ingest::{Config, IngestService, SqliteStore};
//!
//! let config = Config::builder()
//!     .host("broker.local")
//!     .topic_filter("+/esp32/#")
//!     .build();
//!
//! let store = SqliteStore::new("sensorhub.db")?;
//! let service = IngestService::new(config, store);
//! service.run().await?;
//! ```

pub mod cache;
pub mod config;
pub mod payload;
pub mod pipeline;
pub mod query;
pub mod sqlite;
pub mod store;
pub mod subscriber;
pub mod topic;
pub mod writer;

pub use cache::{CacheKey, ChangeCache};
pub use config::{Config, ConfigError};
pub use payload::{DecodeError, DecodedPayload, STRUCTURED_CATEGORY};
pub use pipeline::{IngestPipeline, IngestStatsSnapshot, MessageOutcome};
pub use query::QueryService;
pub use sqlite::SqliteStore;
pub use store::{MemoryStore, Reading, ReadingFilter, ReadingStore, TimeRange};
pub use subscriber::{InboundMessage, MqttSubscriber};
pub use writer::ReadingWriter;

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Ingestion Service
///
/// Wires a subscriber, the ingestion pipeline and a query service around one
/// shared store.
///
/// # Type Parameters
///
/// - `S` -- Storage backend (e.g., `SqliteStore`)
pub struct IngestService<S: ReadingStore> {
    config: Config,
    store: Arc<S>,
    pipeline: Arc<IngestPipeline<S>>,
}

impl<S: ReadingStore + 'static> IngestService<S> {
    /// Create a new ingestion service
    pub fn new(config: Config, store: S) -> Self {
        let store = Arc::new(store);
        let pipeline = Arc::new(IngestPipeline::new(ReadingWriter::new(Arc::clone(&store))));

        Self {
            config,
            store,
            pipeline,
        }
    }

    /// Get the store for direct access
    pub fn store(&self) -> Arc<S> {
        Arc::clone(&self.store)
    }

    pub fn pipeline(&self) -> Arc<IngestPipeline<S>> {
        Arc::clone(&self.pipeline)
    }

    /// Query service sharing this service's store
    pub fn query_service(&self) -> QueryService<S> {
        QueryService::new(Arc::clone(&self.store))
    }

    /// Create a channel for feeding messages without a broker
    pub fn create_channel(
        &self,
    ) -> (mpsc::Sender<InboundMessage>, mpsc::Receiver<InboundMessage>) {
        subscriber::channel(self.config.mqtt.channel_capacity)
    }

    /// Run the pipeline on an existing receiver until all senders are dropped
    pub async fn run_standalone(&self, rx: mpsc::Receiver<InboundMessage>) -> Result<()> {
        Arc::clone(&self.pipeline)
            .run(rx, &self.config.pipeline)
            .await
    }

    /// Run the MQTT subscriber and the pipeline
    pub async fn run(self) -> Result<()> {
        tracing::info!("Starting Sensorhub Ingestion Service");
        tracing::info!(
            "  Broker: {}:{}",
            self.config.mqtt.host,
            self.config.mqtt.port
        );
        tracing::info!("  Topics: {}", self.config.mqtt.topic_filter);
        tracing::info!("  Workers: {}", self.config.pipeline.workers);

        let (tx, rx) = self.create_channel();
        let subscriber = MqttSubscriber::new(self.config.mqtt.clone());
        let pipeline = Arc::clone(&self.pipeline);

        // Run subscriber and pipeline concurrently
        tokio::try_join!(subscriber.run(tx), pipeline.run(rx, &self.config.pipeline))?;

        Ok(())
    }
}
