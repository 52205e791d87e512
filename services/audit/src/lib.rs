//! Catalog Audit - Kafka pipeline for grocery catalog audit records
//!
//! The catalog service publishes one [`AuditRecord`] per item mutation
//! (create, update, delete) through [`AuditProducer`]. The `audit-sink` binary
//! consumes them with [`AuditConsumer`] and persists each one via
//! [`AuditSinkHandler`].
//!
//! # Example
//!
//! ```rust,no_run
//! use catalog_audit::{AuditAction, AuditProducer, AuditRecord, KafkaConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let producer = AuditProducer::new(KafkaConfig::new("localhost:9092"))?;
//!     producer
//!         .send_record(&AuditRecord::new(AuditAction::Create, "42"))
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod consumer;
pub mod producer;
pub mod record;
pub mod sink;

pub use config::{ConfigError, KafkaConfig, SinkConfig};
pub use consumer::{
    AuditConsumer, ConsumedMessage, ConsumerError, RecordHandler, RecordPosition, SettledOffsets,
    Settlement,
};
pub use producer::{AuditProducer, DeliveryReceipt, ProducerError};
pub use record::{AuditAction, AuditRecord};
pub use sink::{AuditSinkHandler, AuditStore, PgAuditStore};
