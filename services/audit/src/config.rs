//! Kafka and sink configuration for the audit pipeline.
//!
//! `KafkaConfig` is embedded by the catalog service (producer side) and by the
//! `audit-sink` binary (consumer side). `SinkConfig` is the sink's full
//! configuration, layered from files and `AUDIT__*` environment variables.
//!
//! TLS and SASL settings are plain librdkafka properties and go in
//! `extra_properties` (`security.protocol`, `sasl.mechanism`, ...).

use rdkafka::config::ClientConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("audit setting {0} must be set")]
    Missing(&'static str),

    #[error("audit setting {key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("audit configuration unreadable: {0}")]
    Load(String),
}

/// Settings used only by the audit sink's consumer group
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub group_id: String,
    /// Where a fresh group starts reading: earliest or latest
    pub auto_offset_reset: String,
    pub session_timeout_ms: u64,
    /// Pause before re-reading a message whose record could not be stored
    pub retry_backoff_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group_id: "audit-sink".to_string(),
            auto_offset_reset: "earliest".to_string(),
            session_timeout_ms: 30_000,
            retry_backoff_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    pub audit: String,
    /// Receives messages the sink could not decode
    pub dead_letter_queue: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            audit: "catalog.audit".to_string(),
            dead_letter_queue: "catalog.audit.dlq".to_string(),
        }
    }
}

/// Broker connection shared by the audit producer and consumer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Comma-separated `host:port` list
    pub bootstrap_servers: String,
    pub client_id: String,
    /// Upper bound on one audit delivery, in milliseconds
    pub request_timeout_ms: u64,
    /// `0`, `1` or `all`
    pub acks: String,
    pub consumer: ConsumerConfig,
    pub topics: TopicConfig,
    /// Passed to librdkafka verbatim, after the typed settings
    pub extra_properties: HashMap<String, String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            client_id: "catalog-audit".to_string(),
            request_timeout_ms: 5_000,
            acks: "all".to_string(),
            consumer: ConsumerConfig::default(),
            topics: TopicConfig::default(),
            extra_properties: HashMap::new(),
        }
    }
}

impl KafkaConfig {
    pub fn new(bootstrap_servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            ..Default::default()
        }
    }

    fn client_config(&self, typed: &[(&str, String)]) -> ClientConfig {
        let mut client = ClientConfig::new();
        client
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("client.id", &self.client_id);

        for (key, value) in typed {
            client.set(*key, value);
        }
        for (key, value) in &self.extra_properties {
            client.set(key, value);
        }
        client
    }

    /// Idempotent producer settings for audit delivery
    pub fn build_producer_config(&self) -> ClientConfig {
        self.client_config(&[
            ("acks", self.acks.clone()),
            ("message.timeout.ms", self.request_timeout_ms.to_string()),
            ("enable.idempotence", "true".to_string()),
        ])
    }

    /// Consumer group settings. Offsets are committed by the sink, never automatically.
    pub fn build_consumer_config(&self) -> ClientConfig {
        self.client_config(&[
            ("group.id", self.consumer.group_id.clone()),
            ("auto.offset.reset", self.consumer.auto_offset_reset.clone()),
            ("enable.auto.commit", "false".to_string()),
            (
                "session.timeout.ms",
                self.consumer.session_timeout_ms.to_string(),
            ),
        ])
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.consumer.retry_backoff_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bootstrap_servers.trim().is_empty() {
            return Err(ConfigError::Missing("bootstrap_servers"));
        }
        if self.topics.audit.trim().is_empty() {
            return Err(ConfigError::Missing("topics.audit"));
        }
        if self.topics.dead_letter_queue == self.topics.audit {
            return Err(ConfigError::Invalid {
                key: "topics.dead_letter_queue",
                reason: "must differ from topics.audit".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "audit-sink".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// PostgreSQL holding the `audit_records` table
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Apply `migrations/` before consuming
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

fn default_max_connections() -> u32 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_run_migrations() -> bool {
    true
}

/// Full configuration of the `audit-sink` binary
#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub kafka: KafkaConfig,
    pub database: DatabaseConfig,
}

impl SinkConfig {
    /// `config/audit.*`, then `/etc/catalog/audit.*`, then `AUDIT__*` variables
    pub fn load() -> Result<Self, ConfigError> {
        let sink: SinkConfig = config::Config::builder()
            .add_source(config::File::with_name("config/audit").required(false))
            .add_source(config::File::with_name("/etc/catalog/audit").required(false))
            // AUDIT__DATABASE__URL -> database.url
            .add_source(
                config::Environment::with_prefix("AUDIT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(config::Config::try_deserialize::<SinkConfig>)
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        sink.kafka.validate()?;
        Ok(sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = KafkaConfig::default();
        assert_eq!(config.bootstrap_servers, "localhost:9092");
        assert_eq!(config.topics.audit, "catalog.audit");
        assert_eq!(config.retry_backoff(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_blank_audit_topic_rejected() {
        let mut config = KafkaConfig::default();
        config.topics.audit = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("topics.audit"))
        ));
    }

    #[test]
    fn test_dead_letter_topic_must_differ() {
        let mut config = KafkaConfig::default();
        config.topics.dead_letter_queue = config.topics.audit.clone();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "topics.dead_letter_queue", .. })
        ));
    }

    #[test]
    fn test_producer_config_build() {
        let producer_config = KafkaConfig::new("broker:9092").build_producer_config();

        assert_eq!(producer_config.get("bootstrap.servers"), Some("broker:9092"));
        assert_eq!(producer_config.get("acks"), Some("all"));
        assert_eq!(producer_config.get("enable.idempotence"), Some("true"));
    }

    #[test]
    fn test_consumer_config_disables_auto_commit() {
        let consumer_config = KafkaConfig::new("localhost:9092").build_consumer_config();

        assert_eq!(consumer_config.get("group.id"), Some("audit-sink"));
        assert_eq!(consumer_config.get("enable.auto.commit"), Some("false"));
    }

    #[test]
    fn test_extra_properties_reach_both_clients() {
        let mut config = KafkaConfig::default();
        config
            .extra_properties
            .insert("security.protocol".to_string(), "sasl_ssl".to_string());

        assert_eq!(
            config.build_producer_config().get("security.protocol"),
            Some("sasl_ssl")
        );
        assert_eq!(
            config.build_consumer_config().get("security.protocol"),
            Some("sasl_ssl")
        );
    }
}
