//! Kafka consumer loop for the audit sink.
//!
//! Offsets are committed per message, and only once the message is settled:
//! stored, or parked on the dead letter topic. A message that failed to
//! persist is re-read from its own offset after a backoff, so later messages
//! on the same partition never commit past it.

use crate::config::KafkaConfig;
use crate::producer::{AuditProducer, MESSAGE_TYPE_HEADER};
use crate::record::AuditRecord;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message as KafkaMessage};
use rdkafka::{Offset, TopicPartitionList};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("audit consumer could not be created: {0}")]
    Create(String),

    #[error("audit topic subscription failed: {0}")]
    Subscribe(String),

    #[error("undecodable audit message: {0}")]
    Decode(String),

    #[error("offset commit failed: {0}")]
    Commit(String),

    #[error("audit record not persisted: {0}")]
    Persist(String),
}

impl ConsumerError {
    /// Whether re-reading the same message can succeed later
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConsumerError::Persist(_))
    }
}

/// What the loop does with a message once the handler returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Commit past the message
    Commit,
    /// Park the message on the dead letter topic, then commit past it
    DeadLetter,
    /// Rewind to the message and read it again after the backoff
    Retry,
}

impl Settlement {
    pub fn of(result: &Result<(), ConsumerError>) -> Self {
        match result {
            Ok(()) => Settlement::Commit,
            Err(e) if e.is_retryable() => Settlement::Retry,
            Err(_) => Settlement::DeadLetter,
        }
    }
}

/// Next offset to commit for every partition with a settled message
#[derive(Debug, Default)]
pub struct SettledOffsets {
    next: HashMap<(String, i32), i64>,
}

impl SettledOffsets {
    pub fn settle(&mut self, topic: &str, position: RecordPosition) {
        let next = self
            .next
            .entry((topic.to_owned(), position.partition))
            .or_insert(position.offset + 1);
        *next = (*next).max(position.offset + 1);
    }

    pub fn next_offset(&self, topic: &str, partition: i32) -> Option<i64> {
        self.next.get(&(topic.to_owned(), partition)).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.next.is_empty()
    }

    fn partition_list(&self) -> Result<TopicPartitionList, ConsumerError> {
        let mut list = TopicPartitionList::new();
        for ((topic, partition), offset) in &self.next {
            list.add_partition_offset(topic, *partition, Offset::Offset(*offset))
                .map_err(|e| ConsumerError::Commit(e.to_string()))?;
        }
        Ok(list)
    }
}

/// Partition and offset an audit message was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordPosition {
    pub partition: i32,
    pub offset: i64,
}

/// One message read off the audit topic, before decoding
#[derive(Debug, Clone)]
pub struct ConsumedMessage {
    pub topic: String,
    pub position: RecordPosition,
    pub message_type: Option<String>,
    pub payload: Vec<u8>,
}

impl ConsumedMessage {
    pub fn decode(&self) -> Result<AuditRecord, ConsumerError> {
        serde_json::from_slice(&self.payload).map_err(|e| ConsumerError::Decode(e.to_string()))
    }

    fn from_kafka<M: KafkaMessage>(msg: &M) -> Self {
        let message_type = msg.headers().and_then(|headers| {
            headers
                .iter()
                .find(|h| h.key == MESSAGE_TYPE_HEADER)
                .and_then(|h| h.value)
                .and_then(|v| std::str::from_utf8(v).ok())
                .map(str::to_owned)
        });

        Self {
            topic: msg.topic().to_owned(),
            position: RecordPosition {
                partition: msg.partition(),
                offset: msg.offset(),
            },
            message_type,
            payload: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        }
    }
}

/// Processes consumed audit messages
#[async_trait::async_trait]
pub trait RecordHandler: Send + Sync {
    async fn handle(&self, message: &ConsumedMessage) -> Result<(), ConsumerError>;
}

/// Kafka consumer subscribed to the audit topic
pub struct AuditConsumer {
    consumer: StreamConsumer,
    config: Arc<KafkaConfig>,
    shutdown_tx: broadcast::Sender<()>,
    dlq_producer: Option<Arc<AuditProducer>>,
    retry_backoff: Duration,
}

impl AuditConsumer {
    pub fn new(config: KafkaConfig) -> Result<Self, ConsumerError> {
        info!(
            brokers = %config.bootstrap_servers,
            group = %config.consumer.group_id,
            "Creating audit consumer"
        );

        let consumer: StreamConsumer = config
            .build_consumer_config()
            .create()
            .map_err(|e| ConsumerError::Create(e.to_string()))?;

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            consumer,
            retry_backoff: config.retry_backoff(),
            config: Arc::new(config),
            shutdown_tx,
            dlq_producer: None,
        })
    }

    /// Route rejected messages to the dead letter topic
    pub fn with_dlq_producer(mut self, producer: Arc<AuditProducer>) -> Self {
        self.dlq_producer = Some(producer);
        self
    }

    pub fn subscribe_audit(&self) -> Result<(), ConsumerError> {
        let topic = self.config.topics.audit.as_str();
        info!(topic, "Subscribing to audit topic");
        self.consumer
            .subscribe(&[topic])
            .map_err(|e| ConsumerError::Subscribe(e.to_string()))
    }

    /// Synchronously commit every settled offset
    pub fn commit(&self, settled: &SettledOffsets) -> Result<(), ConsumerError> {
        if settled.is_empty() {
            return Ok(());
        }
        self.consumer
            .commit(&settled.partition_list()?, CommitMode::Sync)
            .map_err(|e| ConsumerError::Commit(e.to_string()))
    }

    fn commit_message(&self, message: &BorrowedMessage<'_>) {
        if let Err(e) = self.consumer.commit_message(message, CommitMode::Async) {
            warn!(error = %e, "Async offset commit failed");
        }
    }

    fn rewind(&self, message: &ConsumedMessage) {
        if let Err(e) = self.consumer.seek(
            &message.topic,
            message.position.partition,
            Offset::Offset(message.position.offset),
            Duration::from_secs(5),
        ) {
            error!(
                partition = message.position.partition,
                offset = message.position.offset,
                error = %e,
                "Rewind failed"
            );
        }
    }

    /// Handle that stops [`AuditConsumer::run`] when signalled
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    #[instrument(skip(self, handler))]
    pub async fn run<H: RecordHandler>(&self, handler: Arc<H>) -> Result<(), ConsumerError> {
        use tokio_stream::StreamExt;

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let stream = self.consumer.stream();
        tokio::pin!(stream);

        let mut settled = SettledOffsets::default();
        info!("Audit sink consuming");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Audit sink shutting down");
                    break;
                }
                next = stream.next() => {
                    match next {
                        Some(Ok(borrowed)) => {
                            let message = ConsumedMessage::from_kafka(&borrowed);
                            debug!(
                                partition = message.position.partition,
                                offset = message.position.offset,
                                "Audit message received"
                            );

                            let result = handler.handle(&message).await;
                            let mut settlement = Settlement::of(&result);
                            if settlement == Settlement::DeadLetter
                                && !self.dead_letter(&message, &result).await
                            {
                                settlement = Settlement::Retry;
                            }

                            match settlement {
                                Settlement::Commit | Settlement::DeadLetter => {
                                    settled.settle(&message.topic, message.position);
                                    self.commit_message(&borrowed);
                                }
                                Settlement::Retry => {
                                    warn!(
                                        partition = message.position.partition,
                                        offset = message.position.offset,
                                        backoff_ms = self.retry_backoff.as_millis() as u64,
                                        "Audit message will be retried"
                                    );
                                    self.rewind(&message);
                                    tokio::select! {
                                        _ = shutdown_rx.recv() => break,
                                        _ = tokio::time::sleep(self.retry_backoff) => {}
                                    }
                                }
                            }
                        }
                        Some(Err(e)) => error!(error = %e, "Kafka stream error"),
                        None => break,
                    }
                }
            }
        }

        if let Err(e) = self.commit(&settled) {
            warn!(error = %e, "Final offset commit failed");
        }

        Ok(())
    }

    /// Park a rejected message on the DLQ. Returns whether the loop may move
    /// past it. Without a DLQ producer the message is logged and dropped.
    async fn dead_letter(&self, message: &ConsumedMessage, result: &Result<(), ConsumerError>) -> bool {
        let cause = match result {
            Err(e) => e.to_string(),
            Ok(()) => return true,
        };

        warn!(
            partition = message.position.partition,
            offset = message.position.offset,
            error = %cause,
            "Audit message rejected"
        );

        let Some(dlq) = self.dlq_producer.as_ref() else {
            error!(
                partition = message.position.partition,
                offset = message.position.offset,
                "No dead letter topic configured; dropping undecodable audit message"
            );
            return true;
        };

        match dlq.send_to_dlq(&message.topic, &message.payload, &cause).await {
            Ok(_) => true,
            Err(e) => {
                error!(error = %e, "Dead letter publish failed");
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::record::AuditAction;

    pub(crate) fn consumed(payload: Vec<u8>, message_type: Option<&str>) -> ConsumedMessage {
        ConsumedMessage {
            topic: "catalog.audit".to_string(),
            position: RecordPosition {
                partition: 2,
                offset: 41,
            },
            message_type: message_type.map(str::to_owned),
            payload,
        }
    }

    #[test]
    fn test_decode_record() {
        let record = AuditRecord::new(AuditAction::Create, "5");
        let message = consumed(serde_json::to_vec(&record).unwrap(), None);

        assert_eq!(message.decode().unwrap(), record);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let message = consumed(b"\x00\x01".to_vec(), None);
        assert!(matches!(message.decode(), Err(ConsumerError::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_unknown_action() {
        let message = consumed(
            br#"{"action":"purge","itemID":"1","timestamp":"2024-01-01T00:00:00Z"}"#.to_vec(),
            None,
        );
        assert!(matches!(message.decode(), Err(ConsumerError::Decode(_))));
    }

    #[test]
    fn test_settlement_retries_persist_failures() {
        assert_eq!(Settlement::of(&Ok(())), Settlement::Commit);
        assert_eq!(
            Settlement::of(&Err(ConsumerError::Persist("database down".into()))),
            Settlement::Retry
        );
        assert_eq!(
            Settlement::of(&Err(ConsumerError::Decode("bad json".into()))),
            Settlement::DeadLetter
        );
    }

    #[test]
    fn test_settled_offsets_never_pass_unsettled_message() {
        let mut settled = SettledOffsets::default();
        let at = |offset| RecordPosition {
            partition: 0,
            offset,
        };

        settled.settle("catalog.audit", at(4));
        // offset 5 failed to persist and is not settled
        assert_eq!(settled.next_offset("catalog.audit", 0), Some(5));

        settled.settle("catalog.audit", at(5));
        settled.settle("catalog.audit", at(6));
        assert_eq!(settled.next_offset("catalog.audit", 0), Some(7));

        // replays of an older offset never move the position backwards
        settled.settle("catalog.audit", at(5));
        assert_eq!(settled.next_offset("catalog.audit", 0), Some(7));
        assert_eq!(settled.next_offset("catalog.audit", 1), None);
    }

    #[test]
    fn test_settled_offsets_build_partition_list() {
        let mut settled = SettledOffsets::default();
        settled.settle(
            "catalog.audit",
            RecordPosition {
                partition: 3,
                offset: 9,
            },
        );

        let list = settled.partition_list().unwrap();
        let entry = list.find_partition("catalog.audit", 3).unwrap();
        assert_eq!(entry.offset(), Offset::Offset(10));
    }
}
