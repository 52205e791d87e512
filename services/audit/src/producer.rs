//! Kafka producer for audit records.
//!
//! Records are JSON encoded and keyed by item identity, so every mutation of
//! one item lands on the same partition in order.

use crate::config::KafkaConfig;
use crate::record::AuditRecord;
use base64::Engine as _;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub const MESSAGE_TYPE_HEADER: &str = "message-type";
pub const AUDIT_MESSAGE_TYPE: &str = "audit_record";
pub const DEAD_LETTER_MESSAGE_TYPE: &str = "dead_letter";

#[derive(Error, Debug)]
pub enum ProducerError {
    #[error("audit producer could not be created: {0}")]
    Create(String),

    #[error("audit payload could not be encoded: {0}")]
    Encode(String),

    #[error("delivery to {topic} failed: {reason}")]
    Delivery { topic: String, reason: String },

    #[error("flush did not finish within {0:?}")]
    FlushTimeout(Duration),
}

/// Where the broker stored a delivered message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub partition: i32,
    pub offset: i64,
}

/// Keyed JSON payload plus string headers, ready for one topic
#[derive(Debug, Clone)]
struct Envelope {
    topic: String,
    key: String,
    payload: Vec<u8>,
    headers: Vec<(&'static str, String)>,
}

impl Envelope {
    fn json<T: serde::Serialize>(
        topic: &str,
        key: impl Into<String>,
        body: &T,
        message_type: &str,
    ) -> Result<Self, ProducerError> {
        let payload = serde_json::to_vec(body).map_err(|e| ProducerError::Encode(e.to_string()))?;
        Ok(Self {
            topic: topic.to_owned(),
            key: key.into(),
            payload,
            headers: vec![(MESSAGE_TYPE_HEADER, message_type.to_owned())],
        })
    }

    fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    fn owned_headers(&self) -> OwnedHeaders {
        self.headers
            .iter()
            .fold(OwnedHeaders::new(), |acc, (name, value)| {
                acc.insert(Header {
                    key: *name,
                    value: Some(value.as_str()),
                })
            })
    }
}

/// Kafka producer publishing audit records and dead letters
pub struct AuditProducer {
    producer: FutureProducer,
    config: Arc<KafkaConfig>,
    delivery_timeout: Duration,
}

impl AuditProducer {
    pub fn new(config: KafkaConfig) -> Result<Self, ProducerError> {
        info!(brokers = %config.bootstrap_servers, "Creating audit producer");

        let producer: FutureProducer = config
            .build_producer_config()
            .create()
            .map_err(|e| ProducerError::Create(e.to_string()))?;

        Ok(Self {
            producer,
            delivery_timeout: config.request_timeout(),
            config: Arc::new(config),
        })
    }

    #[instrument(skip(self, envelope), fields(topic = %envelope.topic, key = %envelope.key))]
    async fn deliver(&self, envelope: Envelope) -> Result<DeliveryReceipt, ProducerError> {
        let record = FutureRecord::to(&envelope.topic)
            .key(&envelope.key)
            .payload(&envelope.payload)
            .headers(envelope.owned_headers());

        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.delivery_timeout))
            .await
            .map_err(|(e, _)| ProducerError::Delivery {
                topic: envelope.topic.clone(),
                reason: e.to_string(),
            })?;

        debug!(partition, offset, bytes = envelope.payload.len(), "Delivered");

        Ok(DeliveryReceipt { partition, offset })
    }

    /// Publish one audit record to the audit topic
    pub async fn send_record(&self, record: &AuditRecord) -> Result<DeliveryReceipt, ProducerError> {
        let envelope = audit_envelope(&self.config.topics.audit, record)?;
        self.deliver(envelope).await
    }

    /// Park a message the sink could not handle on the dead letter topic
    pub async fn send_to_dlq(
        &self,
        source_topic: &str,
        payload: &[u8],
        reason: &str,
    ) -> Result<DeliveryReceipt, ProducerError> {
        let body = dead_letter_body(source_topic, payload, reason);
        let envelope = Envelope::json(
            &self.config.topics.dead_letter_queue,
            Uuid::new_v4().to_string(),
            &body,
            DEAD_LETTER_MESSAGE_TYPE,
        )?
        .header("original-topic", source_topic)
        .header("error-reason", reason);

        self.deliver(envelope).await
    }

    pub fn flush(&self, timeout: Duration) -> Result<(), ProducerError> {
        self.producer
            .flush(Timeout::After(timeout))
            .map_err(|_| ProducerError::FlushTimeout(timeout))
    }
}

impl Drop for AuditProducer {
    fn drop(&mut self) {
        if let Err(e) = self.flush(Duration::from_secs(5)) {
            warn!(error = %e, "Pending audit messages dropped at shutdown");
        }
    }
}

fn audit_envelope(topic: &str, record: &AuditRecord) -> Result<Envelope, ProducerError> {
    Ok(
        Envelope::json(topic, record.item_id.as_str(), record, AUDIT_MESSAGE_TYPE)?
            .header("action", record.action.as_str()),
    )
}

fn dead_letter_body(source_topic: &str, payload: &[u8], reason: &str) -> serde_json::Value {
    serde_json::json!({
        "original_topic": source_topic,
        "original_message_base64": base64::engine::general_purpose::STANDARD.encode(payload),
        "error": reason,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })
}
