// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ingestion pipeline
//!
//! Turns one inbound message into zero or more persisted readings:
//!
//! 1. Decompose the topic (discard silently if too short)
//! 2. Decode the payload (drop the whole message on error)
//! 3. For each candidate, ask the change cache; write only on change
//!
//! Candidates are independent after decoding: a storage failure on one does
//! not stop the others.

use crate::cache::{CacheKey, ChangeCache};
use crate::config::PipelineConfig;
use crate::payload::{self, DecodedPayload};
use crate::store::ReadingStore;
use crate::subscriber::InboundMessage;
use crate::topic::{self, TopicParts};
use crate::writer::ReadingWriter;
use anyhow::Result;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant};

/// Capacity of each worker's queue
const WORKER_QUEUE_CAPACITY: usize = 64;

/// Longest payload excerpt written to the log
const PAYLOAD_LOG_LIMIT: usize = 128;

/// Worker index for `topic`.
///
/// Every message of a signal shares `(device, category)`, so it lands on the
/// same worker whatever the routing segment. Short topics go to worker 0;
/// they are discarded anyway.
pub fn worker_for(topic: &str, workers: usize) -> usize {
    let Some(parts) = topic::decompose(topic) else {
        return 0;
    };
    let mut hasher = DefaultHasher::new();
    parts.device.hash(&mut hasher);
    parts.category.hash(&mut hasher);
    (hasher.finish() % workers.max(1) as u64) as usize
}

/// Bounded excerpt of a payload for log lines.
fn payload_excerpt(payload: &str) -> &str {
    match payload.char_indices().nth(PAYLOAD_LOG_LIMIT) {
        Some((end, _)) => &payload[..end],
        None => payload,
    }
}

/// One signal value extracted from a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub key: CacheKey,
    /// Persisted sensor type: the field name for structured readings,
    /// the category otherwise
    pub sensor_type: String,
    pub value: String,
}

/// Expand a decoded payload into candidates for `parts.device`.
pub fn candidates(parts: TopicParts<'_>, decoded: DecodedPayload) -> Vec<Candidate> {
    match decoded {
        DecodedPayload::Structured(fields) => fields
            .into_iter()
            .map(|(field, value)| Candidate {
                key: CacheKey::with_field(parts.device, parts.category, field.as_str()),
                sensor_type: field,
                value,
            })
            .collect(),
        DecodedPayload::Scalar(value) => vec![Candidate {
            key: CacheKey::new(parts.device, parts.category),
            sensor_type: parts.category.to_string(),
            value,
        }],
    }
}

/// Per-message candidate accounting.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateCounts {
    pub written: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl CandidateCounts {
    pub fn total(&self) -> usize {
        self.written + self.unchanged + self.failed
    }
}

/// What happened to one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Topic had fewer than three segments
    Discarded,
    /// Structured payload could not be decoded
    DecodeFailed,
    Processed(CandidateCounts),
}

/// Pipeline statistics.
#[derive(Debug, Default)]
pub struct IngestStats {
    pub messages_received: AtomicU64,
    pub messages_discarded: AtomicU64,
    pub decode_errors: AtomicU64,
    pub readings_written: AtomicU64,
    pub readings_unchanged: AtomicU64,
    pub storage_errors: AtomicU64,
}

impl IngestStats {
    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_discarded: self.messages_discarded.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            readings_written: self.readings_written.load(Ordering::Relaxed),
            readings_unchanged: self.readings_unchanged.load(Ordering::Relaxed),
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of pipeline statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStatsSnapshot {
    pub messages_received: u64,
    pub messages_discarded: u64,
    pub decode_errors: u64,
    pub readings_written: u64,
    pub readings_unchanged: u64,
    pub storage_errors: u64,
}

/// Ingestion pipeline
///
/// Owns the change cache for its whole lifetime. `handle_message` takes
/// `&self` and is safe to call from many tasks at once.
pub struct IngestPipeline<S: ReadingStore> {
    cache: ChangeCache,
    writer: ReadingWriter<S>,
    stats: IngestStats,
}

impl<S: ReadingStore + 'static> IngestPipeline<S> {
    /// Create a pipeline writing through `writer`
    pub fn new(writer: ReadingWriter<S>) -> Self {
        Self {
            cache: ChangeCache::new(),
            writer,
            stats: IngestStats::default(),
        }
    }

    /// Get pipeline statistics
    pub fn stats(&self) -> IngestStatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of signals currently tracked by the change cache
    pub fn tracked_signals(&self) -> usize {
        self.cache.len()
    }

    /// Process one message end to end.
    pub fn handle_message(&self, topic: &str, payload: &str) -> MessageOutcome {
        self.stats.messages_received.fetch_add(1, Ordering::Relaxed);

        let Some(parts) = topic::decompose(topic) else {
            self.stats.messages_discarded.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Discarding message on short topic '{}'", topic);
            return MessageOutcome::Discarded;
        };

        let decoded = match payload::decode(parts.category, payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "Dropping message on {}: {} (payload, {} bytes: {})",
                    topic,
                    e,
                    payload.len(),
                    payload_excerpt(payload)
                );
                return MessageOutcome::DecodeFailed;
            }
        };

        let mut counts = CandidateCounts::default();
        for candidate in candidates(parts, decoded) {
            if !self.cache.observe(candidate.key.clone(), &candidate.value) {
                counts.unchanged += 1;
                self.stats.readings_unchanged.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            match self
                .writer
                .write(parts.device, &candidate.sensor_type, &candidate.value)
            {
                Ok(_) => {
                    counts.written += 1;
                    self.stats.readings_written.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!("Stored reading: {}={}", candidate.key, candidate.value);
                }
                Err(e) => {
                    // The cache already holds the new value: this change is lost
                    counts.failed += 1;
                    self.stats.storage_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::error!("Failed to store reading for {}: {:#}", candidate.key, e);
                }
            }
        }

        tracing::trace!(
            "{}: {} candidates, {} written",
            topic,
            counts.total(),
            counts.written
        );
        MessageOutcome::Processed(counts)
    }

    /// Consume messages from `rx` until every sender is dropped.
    ///
    /// Messages are partitioned over `config.workers` workers by
    /// `(device, category)`, so every signal is always handled by the same
    /// worker in arrival order. Different signals proceed in parallel on the
    /// blocking pool; storage calls are synchronous.
    pub async fn run(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<InboundMessage>,
        config: &PipelineConfig,
    ) -> Result<()> {
        let workers = config.workers.max(1);
        tracing::info!("IngestPipeline started ({} workers)", workers);

        let mut queues = Vec::with_capacity(workers);
        let mut tasks = JoinSet::new();
        for _ in 0..workers {
            let (tx, worker_rx) = mpsc::channel(WORKER_QUEUE_CAPACITY);
            queues.push(tx);
            tasks.spawn(Arc::clone(&self).work(worker_rx));
        }

        let report_stats = config.stats_interval_secs > 0;
        let period = Duration::from_secs(config.stats_interval_secs.max(1));
        let mut stats_interval = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                message = rx.recv() => {
                    let Some(message) = message else { break };

                    let queue = &queues[worker_for(&message.topic, workers)];
                    if queue.send(message).await.is_err() {
                        tracing::error!("Ingest worker stopped, no longer accepting messages");
                        break;
                    }
                }

                _ = stats_interval.tick(), if report_stats => {
                    self.log_stats();
                }
            }
        }

        // Closing the queues lets every worker drain and exit
        drop(queues);
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!("Ingest worker failed: {}", e);
            }
        }

        tracing::info!("IngestPipeline stopped (input channel closed)");
        self.log_stats();
        Ok(())
    }

    /// Handle one worker's queue, one message at a time.
    async fn work(self: Arc<Self>, mut rx: mpsc::Receiver<InboundMessage>) {
        while let Some(message) = rx.recv().await {
            let pipeline = Arc::clone(&self);
            let result = tokio::task::spawn_blocking(move || {
                pipeline.handle_message(&message.topic, &message.payload);
            })
            .await;
            if let Err(e) = result {
                tracing::error!("Ingest task failed: {}", e);
            }
        }
    }

    fn log_stats(&self) {
        let stats = self.stats();
        tracing::info!(
            "Ingest stats: received={} written={} unchanged={} discarded={} decode_errors={} storage_errors={} signals={}",
            stats.messages_received,
            stats.readings_written,
            stats.readings_unchanged,
            stats.messages_discarded,
            stats.decode_errors,
            stats.storage_errors,
            self.tracked_signals()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, ReadingFilter};

    fn pipeline() -> (Arc<MemoryStore>, IngestPipeline<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let pipeline = IngestPipeline::new(ReadingWriter::new(Arc::clone(&store)));
        (store, pipeline)
    }

    fn processed(written: usize, unchanged: usize, failed: usize) -> MessageOutcome {
        MessageOutcome::Processed(CandidateCounts {
            written,
            unchanged,
            failed,
        })
    }

    #[test]
    fn test_candidates_structured() {
        let parts = topic::decompose("d1/esp32/sensors_data").unwrap();
        let decoded = DecodedPayload::Structured(vec![
            ("temperature".into(), "22".into()),
            ("humidity".into(), "48".into()),
        ]);

        let candidates = candidates(parts, decoded);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].key.to_string(), "d1/sensors_data/temperature");
        assert_eq!(candidates[0].sensor_type, "temperature");
        assert_eq!(candidates[1].key.to_string(), "d1/sensors_data/humidity");
        assert_eq!(candidates[1].value, "48");
    }

    #[test]
    fn test_candidates_scalar() {
        let parts = topic::decompose("d1/esp32/motion").unwrap();
        let candidates = candidates(parts, DecodedPayload::Scalar("1".into()));

        assert_eq!(
            candidates,
            vec![Candidate {
                key: CacheKey::new("d1", "motion"),
                sensor_type: "motion".into(),
                value: "1".into(),
            }]
        );
    }

    #[test]
    fn test_same_message_twice_writes_once() {
        let (store, pipeline) = pipeline();

        assert_eq!(pipeline.handle_message("d1/esp32/motion", "1"), processed(1, 0, 0));
        assert_eq!(pipeline.handle_message("d1/esp32/motion", "1"), processed(0, 1, 0));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_short_topic_touches_nothing() {
        let (store, pipeline) = pipeline();

        assert_eq!(pipeline.handle_message("d1/motion", "1"), MessageOutcome::Discarded);
        assert_eq!(pipeline.handle_message("d1", "1"), MessageOutcome::Discarded);
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(pipeline.tracked_signals(), 0);
        assert_eq!(pipeline.stats().messages_discarded, 2);
    }

    #[test]
    fn test_structured_message_yields_independent_readings() {
        let (store, pipeline) = pipeline();

        let outcome = pipeline.handle_message(
            "d1/esp32/sensors_data",
            r#"{"temperature":"22","humidity":"48"}"#,
        );
        assert_eq!(outcome, processed(2, 0, 0));
        assert_eq!(pipeline.tracked_signals(), 2);

        let stored = store.all();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].sensor_type, "temperature");
        assert_eq!(stored[0].value, "22");
        assert_eq!(stored[1].sensor_type, "humidity");
        assert_eq!(stored[1].value, "48");

        // Only humidity changed
        let outcome = pipeline.handle_message(
            "d1/esp32/sensors_data",
            r#"{"temperature":"22","humidity":"50"}"#,
        );
        assert_eq!(outcome, processed(1, 1, 0));
    }

    #[test]
    fn test_change_only_persistence() {
        let (store, pipeline) = pipeline();

        for value in ["20", "20", "21"] {
            pipeline.handle_message(
                "d1/esp32/sensors_data",
                &format!(r#"{{"temperature":"{}"}}"#, value),
            );
        }

        let stored = store
            .query(&ReadingFilter::device("d1").sensor_type("temperature"))
            .unwrap();
        let values: Vec<_> = stored.iter().map(|r| r.value.as_str()).collect();
        assert_eq!(values, vec!["20", "21"]);
    }

    #[test]
    fn test_decode_failure_writes_nothing() {
        let (store, pipeline) = pipeline();

        let outcome = pipeline.handle_message(
            "d1/esp32/sensors_data",
            r#"{"temperature": 20, "humidity": "#,
        );
        assert_eq!(outcome, MessageOutcome::DecodeFailed);

        let outcome = pipeline.handle_message(
            "d1/esp32/sensors_data",
            r#"{"temperature": 20, "gps": [1, 2]}"#,
        );
        assert_eq!(outcome, MessageOutcome::DecodeFailed);

        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(pipeline.tracked_signals(), 0);
        assert_eq!(pipeline.stats().decode_errors, 2);
    }

    #[test]
    fn test_storage_failure_is_per_candidate() {
        let (store, pipeline) = pipeline();
        store.fail_writes_for("humidity");

        let outcome = pipeline.handle_message(
            "d1/esp32/sensors_data",
            r#"{"humidity":"48","temperature":"22","pressure":"1013"}"#,
        );
        assert_eq!(outcome, processed(2, 0, 1));
        let MessageOutcome::Processed(counts) = outcome else {
            panic!("expected processed outcome");
        };
        assert_eq!(counts.total(), 3);

        let types: Vec<_> = store.all().into_iter().map(|r| r.sensor_type).collect();
        assert_eq!(types, vec!["temperature", "pressure"]);
        assert_eq!(pipeline.stats().storage_errors, 1);

        // The failed change is not retried: the cache already holds "48"
        let outcome = pipeline.handle_message("d1/esp32/sensors_data", r#"{"humidity":"48"}"#);
        assert_eq!(outcome, processed(0, 1, 0));
    }

    #[test]
    fn test_scalar_and_structured_namespaces_do_not_collide() {
        let (store, pipeline) = pipeline();

        // Scalar "motion" and a structured field named "motion" are different signals
        pipeline.handle_message("d1/esp32/motion", "1");
        pipeline.handle_message("d1/esp32/sensors_data", r#"{"motion":"1"}"#);

        assert_eq!(store.count().unwrap(), 2);
        assert_eq!(pipeline.tracked_signals(), 2);
    }

    #[test]
    fn test_concurrent_handle_message_same_key() {
        let (store, pipeline) = pipeline();

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..50 {
                        pipeline.handle_message("d1/esp32/fall", "0");
                    }
                });
            }
        });

        assert_eq!(store.count().unwrap(), 1);
        let stats = pipeline.stats();
        assert_eq!(stats.messages_received, 400);
        assert_eq!(stats.readings_written, 1);
        assert_eq!(stats.readings_unchanged, 399);
    }

    #[tokio::test]
    async fn test_run_drains_channel() {
        let (store, pipeline) = pipeline();
        let pipeline = Arc::new(pipeline);
        let (tx, rx) = crate::subscriber::channel(16);

        let config = PipelineConfig {
            workers: 2,
            stats_interval_secs: 0,
        };
        let handle = tokio::spawn({
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.run(rx, &config).await }
        });

        tx.send(InboundMessage::new("d1/esp32/motion", "1")).await.unwrap();
        tx.send(InboundMessage::new("d1/esp32/motion", "1")).await.unwrap();
        tx.send(InboundMessage::new("d2/esp32/fall", "0")).await.unwrap();
        tx.send(InboundMessage::new("bad", "0")).await.unwrap();
        drop(tx);

        handle.await.unwrap().unwrap();

        assert_eq!(store.count().unwrap(), 2);
        let stats = pipeline.stats();
        assert_eq!(stats.messages_received, 4);
        assert_eq!(stats.messages_discarded, 1);
    }

    #[test]
    fn test_worker_for_groups_by_signal() {
        for workers in 1..=8 {
            let index = worker_for("d1/esp32/motion", workers);
            assert!(index < workers);
            assert_eq!(worker_for("d1/gateway/motion", workers), index);
            assert_eq!(worker_for("d1/esp32/motion/extra", workers), index);
        }
        assert_eq!(worker_for("short", 4), 0);
        assert_eq!(worker_for("d1/esp32/motion", 0), 0);
    }

    #[test]
    fn test_payload_excerpt_is_bounded() {
        assert_eq!(payload_excerpt("{\"t\":1"), "{\"t\":1");

        let blob = "é".repeat(PAYLOAD_LOG_LIMIT * 10);
        let excerpt = payload_excerpt(&blob);
        assert_eq!(excerpt.chars().count(), PAYLOAD_LOG_LIMIT);
        assert!(blob.starts_with(excerpt));
    }

    #[tokio::test]
    async fn test_run_keeps_per_signal_order() {
        let (store, pipeline) = pipeline();
        let pipeline = Arc::new(pipeline);
        let (tx, rx) = crate::subscriber::channel(32);

        let config = PipelineConfig {
            workers: 4,
            stats_interval_secs: 0,
        };
        let handle = tokio::spawn({
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.run(rx, &config).await }
        });

        // Every message flips its signal, so every one must be written
        for i in 0..300 {
            let value = (i % 2).to_string();
            for device in ["d1", "d2", "d3"] {
                let topic = format!("{}/esp32/motion", device);
                tx.send(InboundMessage::new(topic, value.clone())).await.unwrap();
            }
        }
        drop(tx);

        handle.await.unwrap().unwrap();

        let stats = pipeline.stats();
        assert_eq!(stats.readings_written, 900);
        assert_eq!(stats.readings_unchanged, 0);

        for device in ["d1", "d2", "d3"] {
            let values: Vec<String> = store
                .query(&ReadingFilter::device(device))
                .unwrap()
                .into_iter()
                .map(|r| r.value)
                .collect();
            let expected: Vec<String> = (0..300).map(|i| (i % 2).to_string()).collect();
            assert_eq!(values, expected);
        }
    }
}
