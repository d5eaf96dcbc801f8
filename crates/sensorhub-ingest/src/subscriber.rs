// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message subscriber
//!
//! Delivers `(topic, payload)` pairs into a channel consumed by the
//! ingestion pipeline.
//!
//! # Operation
//!
//! 1. Connect to the broker (clean session)
//! 2. Subscribe to the topic filter on every ConnAck
//! 3. Forward each incoming Publish into the channel
//! 4. On connection errors, back off and keep polling; the client reconnects

use crate::config::MqttConfig;
use anyhow::Result;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc;

/// Delay before polling again after a connection error
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// One inbound broker message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Build from raw publish bytes; invalid UTF-8 is replaced, not rejected.
    pub fn from_bytes(topic: impl Into<String>, payload: &[u8]) -> Self {
        Self {
            topic: topic.into(),
            payload: String::from_utf8_lossy(payload).into_owned(),
        }
    }
}

/// Create the subscriber -> pipeline channel
pub fn channel(capacity: usize) -> (mpsc::Sender<InboundMessage>, mpsc::Receiver<InboundMessage>) {
    mpsc::channel(capacity)
}

/// Subscriber statistics
#[derive(Debug, Default, Clone)]
pub struct SubscriberStats {
    /// Publish packets forwarded to the pipeline
    pub messages_forwarded: u64,
    /// Successful (re)connections
    pub connections: u64,
    /// Event loop errors
    pub connection_errors: u64,
}

/// MQTT subscriber backed by rumqttc
pub struct MqttSubscriber {
    config: MqttConfig,
    stats: SubscriberStats,
}

impl MqttSubscriber {
    /// Create a new subscriber
    pub fn new(config: MqttConfig) -> Self {
        Self {
            config,
            stats: SubscriberStats::default(),
        }
    }

    /// Get subscriber statistics
    pub fn stats(&self) -> &SubscriberStats {
        &self.stats
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.config.effective_client_id(),
            &self.config.host,
            self.config.port,
        );
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs.max(5)));
        options.set_clean_session(true);
        options
    }

    /// Run until the pipeline side of the channel is dropped.
    pub async fn run(mut self, tx: mpsc::Sender<InboundMessage>) -> Result<()> {
        tracing::info!(
            "MqttSubscriber connecting to {}:{} (filter: {})",
            self.config.host,
            self.config.port,
            self.config.topic_filter
        );

        let (client, eventloop) = AsyncClient::new(self.options(), 10);
        self.poll_loop(client, eventloop, tx).await;

        tracing::info!(
            "MqttSubscriber stopped: forwarded={} connections={} connection_errors={}",
            self.stats.messages_forwarded,
            self.stats.connections,
            self.stats.connection_errors
        );
        Ok(())
    }

    async fn poll_loop(
        &mut self,
        client: AsyncClient,
        mut eventloop: EventLoop,
        tx: mpsc::Sender<InboundMessage>,
    ) {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    self.stats.connections += 1;
                    // Clean sessions drop subscriptions, so renew on every connect
                    match client.try_subscribe(&self.config.topic_filter, QoS::AtLeastOnce) {
                        Ok(()) => tracing::info!(
                            "Connected, subscribed to {}",
                            self.config.topic_filter
                        ),
                        Err(e) => tracing::error!(
                            "Failed to subscribe to {}: {}",
                            self.config.topic_filter,
                            e
                        ),
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = InboundMessage::from_bytes(publish.topic, &publish.payload);
                    if tx.send(message).await.is_err() {
                        tracing::info!("Pipeline channel closed, stopping subscriber");
                        break;
                    }
                    self.stats.messages_forwarded += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    self.stats.connection_errors += 1;
                    tracing::warn!("MQTT connection error: {}", e);
                    if tx.is_closed() {
                        break;
                    }
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                }
            }
        }
    }
}
