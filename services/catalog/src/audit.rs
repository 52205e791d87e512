use crate::error::AuditError;
use async_trait::async_trait;
use catalog_audit::{AuditProducer, AuditRecord, KafkaConfig};
use tracing::{info, instrument};

/// Publishes audit records for catalog mutations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditEmitter: Send + Sync {
    async fn publish(&self, record: AuditRecord) -> Result<(), AuditError>;
}

/// Emits audit records to the audit topic
pub struct KafkaAuditEmitter {
    producer: AuditProducer,
}

impl KafkaAuditEmitter {
    pub fn new(config: KafkaConfig) -> anyhow::Result<Self> {
        let producer = AuditProducer::new(config)?;
        Ok(Self { producer })
    }
}

#[async_trait]
impl AuditEmitter for KafkaAuditEmitter {
    #[instrument(skip(self, record), fields(action = %record.action, item_id = %record.item_id))]
    async fn publish(&self, record: AuditRecord) -> Result<(), AuditError> {
        self.producer
            .send_record(&record)
            .await
            .map(|_| ())
            .map_err(|e| AuditError::Publish(e.to_string()))
    }
}

/// Writes audit records to the structured log when no broker is configured
#[derive(Debug, Default)]
pub struct LogAuditEmitter;

#[async_trait]
impl AuditEmitter for LogAuditEmitter {
    async fn publish(&self, record: AuditRecord) -> Result<(), AuditError> {
        info!(
            action = %record.action,
            item_id = %record.item_id,
            timestamp = %record.timestamp,
            "Audit record"
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use catalog_audit::AuditAction;
    use std::sync::Mutex;

    /// Emitter that keeps every record it is handed
    #[derive(Default)]
    pub(crate) struct RecordingEmitter {
        records: Mutex<Vec<AuditRecord>>,
    }

    impl RecordingEmitter {
        pub(crate) fn actions(&self) -> Vec<(AuditAction, String)> {
            self.records
                .lock()
                .unwrap()
                .iter()
                .map(|r| (r.action, r.item_id.clone()))
                .collect()
        }
    }

    #[async_trait]
    impl AuditEmitter for RecordingEmitter {
        async fn publish(&self, record: AuditRecord) -> Result<(), AuditError> {
            self.records.lock().unwrap().push(record);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_log_emitter_accepts_records() {
        let emitter = LogAuditEmitter;
        assert!(emitter
            .publish(AuditRecord::new(AuditAction::Delete, "7"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_recording_emitter() {
        let emitter = RecordingEmitter::default();
        emitter
            .publish(AuditRecord::new(AuditAction::Create, "1"))
            .await
            .unwrap();
        assert_eq!(emitter.actions(), vec![(AuditAction::Create, "1".to_string())]);
    }
}
