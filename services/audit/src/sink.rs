//! Persistence side of the audit pipeline.
//!
//! Every audit record consumed from Kafka becomes one row in `audit_records`.
//! Redelivered messages are absorbed by the `(kafka_partition, kafka_offset)`
//! uniqueness constraint.

use crate::config::DatabaseConfig;
use crate::consumer::{ConsumedMessage, ConsumerError, RecordHandler, RecordPosition};
use crate::producer::AUDIT_MESSAGE_TYPE;
use crate::record::AuditRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Durable store for audit records
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Persist one record. Storing the same position twice is a no-op.
    async fn store(&self, record: &AuditRecord, position: RecordPosition) -> Result<()>;
}

/// PostgreSQL-backed audit store
pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    #[instrument(skip(self, record), fields(item_id = %record.item_id, action = %record.action))]
    async fn store(&self, record: &AuditRecord, position: RecordPosition) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO audit_records (
                id, action, item_id, occurred_at, kafka_partition, kafka_offset
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (kafka_partition, kafka_offset) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.action.as_str())
        .bind(&record.item_id)
        .bind(record.timestamp)
        .bind(position.partition)
        .bind(position.offset)
        .execute(&self.pool)
        .await
        .context("Failed to insert audit record")?;

        if result.rows_affected() == 0 {
            debug!("Audit record already stored, skipping");
        }

        Ok(())
    }
}

/// Consumer handler that decodes audit records and persists them
pub struct AuditSinkHandler {
    store: Arc<dyn AuditStore>,
}

impl AuditSinkHandler {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RecordHandler for AuditSinkHandler {
    async fn handle(&self, message: &ConsumedMessage) -> Result<(), ConsumerError> {
        if let Some(other) = message
            .message_type
            .as_deref()
            .filter(|t| *t != AUDIT_MESSAGE_TYPE)
        {
            return Err(ConsumerError::Decode(format!(
                "unexpected message type {}",
                other
            )));
        }

        let record = message.decode()?;

        self.store
            .store(&record, message.position)
            .await
            .map_err(|e| ConsumerError::Persist(format!("{:#}", e)))?;

        debug!(
            item_id = %record.item_id,
            action = %record.action,
            "Audit record stored"
        );

        Ok(())
    }
}
