//! Kafka producer for accepted ingestion envelopes.
//!
//! A returned success must imply a durable enqueue, so the producer runs
//! with broker-side idempotence and full in-sync acknowledgment, and every
//! send is awaited for delivery confirmation before the HTTP response is
//! written.

use rdkafka::message::OwnedHeaders;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use event_schema::InflightEvent;
use trace_context::TraceContext;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("Kafka producer error: {0}")]
    Kafka(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Kafka producer handle. Thread-safe; shared across request tasks.
pub struct EventProducer {
    producer: FutureProducer,
    topic: String,
}

impl EventProducer {
    /// Create the producer with synchronous-ack / idempotence semantics.
    pub fn new(brokers: &str, topic: &str) -> Result<Self, ProducerError> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set("max.in.flight.requests.per.connection", "5")
            .set("message.timeout.ms", "5000")
            .set("compression.type", "snappy")
            .create::<FutureProducer>()
            .map_err(|e| ProducerError::Kafka(e.to_string()))?;

        info!(brokers = %brokers, topic = %topic, "Kafka producer created");

        Ok(Self {
            producer,
            topic: topic.to_string(),
        })
    }

    /// Publish one inflight record keyed by `tenantId|streamKey`, with the
    /// trace context injected as a `traceparent` record header. Resolves
    /// only after the broker acknowledges delivery.
    pub async fn publish(
        &self,
        event: &InflightEvent,
        ctx: &TraceContext,
    ) -> Result<(), ProducerError> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| ProducerError::Serialization(e.to_string()))?;
        let key = event.partition_key();
        let headers = trace_context::inject_headers(OwnedHeaders::new(), ctx);

        let record = FutureRecord::to(&self.topic)
            .payload(&payload)
            .key(&key)
            .headers(headers);

        self.producer
            .send(record, DELIVERY_TIMEOUT)
            .await
            .map_err(|(e, _)| ProducerError::Kafka(e.to_string()))?;

        debug!(
            event_id = %event.envelope.event_id,
            key = %key,
            "Published inflight event"
        );
        Ok(())
    }
}
