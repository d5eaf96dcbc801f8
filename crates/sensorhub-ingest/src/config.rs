// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ingestion service configuration
//!
//! Supports both programmatic (builder) and file-based (TOML) configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Ingestion service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mqtt: MqttConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Broker connection and subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host name
    #[serde(default = "default_host")]
    pub host: String,

    /// Broker port
    #[serde(default = "default_port")]
    pub port: u16,

    /// MQTT client id (empty = derived from the process id)
    #[serde(default)]
    pub client_id: String,

    /// Subscription filter, e.g. `+/esp32/#`
    #[serde(default = "default_topic_filter")]
    pub topic_filter: String,

    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// Capacity of the subscriber -> pipeline channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Durable storage location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path
    #[serde(default = "default_database")]
    pub database: String,
}

/// Pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum messages processed concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Statistics log interval in seconds (0 = disabled)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

fn default_host() -> String {
    "broker.hivemq.com".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_topic_filter() -> String {
    "+/esp32/#".to_string()
}

fn default_keep_alive() -> u64 {
    30
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_database() -> String {
    "sensorhub.db".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_stats_interval() -> u64 {
    60
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: String::new(),
            topic_filter: default_topic_filter(),
            keep_alive_secs: default_keep_alive(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl MqttConfig {
    /// Client id to present to the broker.
    pub fn effective_client_id(&self) -> String {
        if self.client_id.is_empty() {
            format!("sensorhub-ingest-{}", std::process::id())
        } else {
            self.client_id.clone()
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.host.trim().is_empty() {
            return Err(ConfigError::Invalid("MQTT host is empty".into()));
        }
        if self.mqtt.port == 0 {
            return Err(ConfigError::Invalid("MQTT port must be non-zero".into()));
        }
        if self.mqtt.topic_filter.trim().is_empty() {
            return Err(ConfigError::Invalid("MQTT topic filter is empty".into()));
        }
        if self.mqtt.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "Channel capacity must be at least 1".into(),
            ));
        }
        if self.pipeline.workers == 0 {
            return Err(ConfigError::Invalid(
                "Pipeline needs at least one worker".into(),
            ));
        }
        Ok(())
    }
}

/// Config builder for fluent API
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    base: Option<Config>,
    host: Option<String>,
    port: Option<u16>,
    client_id: Option<String>,
    topic_filter: Option<String>,
    database: Option<String>,
    workers: Option<usize>,
    stats_interval_secs: Option<u64>,
}

impl ConfigBuilder {
    /// Start from an existing configuration (e.g. loaded from file)
    pub fn base(mut self, config: Config) -> Self {
        self.base = Some(config);
        self
    }

    /// Set broker host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set broker port
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set MQTT client id
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Set subscription filter
    pub fn topic_filter(mut self, filter: impl Into<String>) -> Self {
        self.topic_filter = Some(filter.into());
        self
    }

    /// Set SQLite database path
    pub fn database(mut self, path: impl Into<String>) -> Self {
        self.database = Some(path.into());
        self
    }

    /// Set pipeline concurrency
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Set statistics log interval (0 = disabled)
    pub fn stats_interval_secs(mut self, secs: u64) -> Self {
        self.stats_interval_secs = Some(secs);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        let mut config = self.base.unwrap_or_default();

        if let Some(host) = self.host {
            config.mqtt.host = host;
        }
        if let Some(port) = self.port {
            config.mqtt.port = port;
        }
        if let Some(client_id) = self.client_id {
            config.mqtt.client_id = client_id;
        }
        if let Some(filter) = self.topic_filter {
            config.mqtt.topic_filter = filter;
        }
        if let Some(database) = self.database {
            config.storage.database = database;
        }
        if let Some(workers) = self.workers {
            config.pipeline.workers = workers;
        }
        if let Some(secs) = self.stats_interval_secs {
            config.pipeline.stats_interval_secs = secs;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();

        assert_eq!(config.mqtt.host, "broker.hivemq.com");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.topic_filter, "+/esp32/#");
        assert_eq!(config.storage.database, "sensorhub.db");
        assert_eq!(config.pipeline.workers, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = Config::builder()
            .host("localhost")
            .port(1884)
            .client_id("node-a")
            .topic_filter("lab/+/#")
            .database(":memory:")
            .workers(2)
            .stats_interval_secs(0)
            .build();

        assert_eq!(config.mqtt.host, "localhost");
        assert_eq!(config.mqtt.port, 1884);
        assert_eq!(config.mqtt.effective_client_id(), "node-a");
        assert_eq!(config.mqtt.topic_filter, "lab/+/#");
        assert_eq!(config.storage.database, ":memory:");
        assert_eq!(config.pipeline.workers, 2);
        assert_eq!(config.pipeline.stats_interval_secs, 0);
    }

    #[test]
    fn test_builder_overrides_base() {
        let mut base = Config::default();
        base.mqtt.host = "from-file".into();
        base.storage.database = "file.db".into();

        let config = Config::builder().base(base).database("cli.db").build();
        assert_eq!(config.mqtt.host, "from-file");
        assert_eq!(config.storage.database, "cli.db");
    }

    #[test]
    fn test_client_id_fallback() {
        let mut mqtt = MqttConfig::default();
        assert!(mqtt.effective_client_id().starts_with("sensorhub-ingest-"));

        mqtt.client_id = "node-a".into();
        assert_eq!(mqtt.effective_client_id(), "node-a");
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[mqtt]
host = "mqtt.local"

[pipeline]
workers = 8
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.mqtt.host, "mqtt.local");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.pipeline.workers, 8);
        assert_eq!(config.storage.database, "sensorhub.db");
    }

    #[test]
    fn test_from_file_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[pipeline]\nworkers = 0").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_from_file_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[mqtt\nhost = ").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn test_validate_rejects_empty_filter() {
        let config = Config::builder().topic_filter("  ").build();
        assert!(config.validate().is_err());
    }
}
