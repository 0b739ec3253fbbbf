//! Wire schema for the event ingestion pipeline.
//!
//! Defines the client-facing envelope, the inflight record carried on the
//! Kafka topic, and the projection posted to the broadcast sink. The gateway
//! validates envelopes structurally; the processor additionally requires
//! `eventId` to parse as a UUID (malformed ids are accepted at the edge and
//! dead-lettered by the worker).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

/// Byte cap for `tenantId` and `eventId`.
pub const MAX_ID_BYTES: usize = 128;

/// Byte cap for `source`, `type` and `streamKey`.
pub const MAX_FIELD_BYTES: usize = 256;

/// Envelope validation failures, surfaced as HTTP 400 by the gateway and as
/// dead-letter reasons by the processor.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} must be a non-empty string")]
    EmptyField(&'static str),

    #[error("{field} exceeds {max} bytes (got {len})")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("schemaVersion must be a positive integer")]
    SchemaVersion,

    #[error("eventId is not a valid UUID: {0}")]
    EventIdNotUuid(String),
}

/// Client-supplied event envelope.
///
/// `eventId` is deliberately a `String` here: UUID parsing is a worker-side
/// invariant, not an ingress one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_id: String,
    pub tenant_id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub stream_key: String,
    pub timestamp_utc: DateTime<Utc>,
    pub schema_version: u32,
    /// Arbitrary JSON, preserved verbatim end to end.
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Structural validation applied at ingress: required fields non-empty,
    /// byte caps enforced, positive schema version. Does NOT require
    /// `eventId` to be a UUID.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_field("eventId", &self.event_id, MAX_ID_BYTES)?;
        check_field("tenantId", &self.tenant_id, MAX_ID_BYTES)?;
        check_field("source", &self.source, MAX_FIELD_BYTES)?;
        check_field("type", &self.event_type, MAX_FIELD_BYTES)?;
        check_field("streamKey", &self.stream_key, MAX_FIELD_BYTES)?;

        if self.schema_version == 0 {
            return Err(ValidationError::SchemaVersion);
        }

        Ok(())
    }

    /// Lowercase hex SHA-256 over the canonical JSON serialization of the
    /// envelope. serde_json objects are backed by a BTreeMap, so payload keys
    /// serialize in a deterministic order and the digest is stable across
    /// retries of the same body.
    pub fn payload_fingerprint(&self) -> String {
        let canonical =
            serde_json::to_vec(self).expect("envelope serialization is infallible");
        hex::encode(Sha256::digest(&canonical))
    }
}

fn check_field(
    name: &'static str,
    value: &str,
    max: usize,
) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField(name));
    }
    if value.len() > max {
        return Err(ValidationError::FieldTooLong {
            field: name,
            len: value.len(),
            max,
        });
    }
    Ok(())
}

/// Record carried on the events topic: the envelope plus everything the
/// worker needs to dedup, trace and measure freshness without trusting
/// broker timestamps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InflightEvent {
    #[serde(flatten)]
    pub envelope: EventEnvelope,
    pub idempotency_key: String,
    pub payload_hash: String,
    /// Stamped by the gateway immediately before publish. Absent on records
    /// produced by older gateways; the persist path substitutes `now`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at_utc: Option<DateTime<Utc>>,
    pub trace_id: String,
}

impl InflightEvent {
    /// Topic partition key. Same tenant + stream always lands on the same
    /// partition, which is what preserves per-stream ordering end to end.
    pub fn partition_key(&self) -> String {
        format!("{}|{}", self.envelope.tenant_id, self.envelope.stream_key)
    }

    /// Worker-side semantic validation: `eventId` must parse as a UUID and
    /// the identifying text fields must be non-empty. Returns the parsed id.
    pub fn validate_for_processing(&self) -> Result<Uuid, ValidationError> {
        for (name, value) in [
            ("tenantId", &self.envelope.tenant_id),
            ("source", &self.envelope.source),
            ("type", &self.envelope.event_type),
            ("streamKey", &self.envelope.stream_key),
            ("idempotencyKey", &self.idempotency_key),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::EmptyField(name));
            }
        }

        Uuid::parse_str(&self.envelope.event_id)
            .map_err(|_| ValidationError::EventIdNotUuid(self.envelope.event_id.clone()))
    }
}

/// Projection of a processed event posted to the realtime broadcast sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastMessage {
    pub event_id: String,
    pub tenant_id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp_utc: DateTime<Utc>,
    pub stream_key: String,
    pub received_at_utc: Option<DateTime<Utc>>,
    pub processed_at_utc: DateTime<Utc>,
    pub trace_id: String,
}

impl BroadcastMessage {
    pub fn from_inflight(
        event: &InflightEvent,
        processed_at_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: event.envelope.event_id.clone(),
            tenant_id: event.envelope.tenant_id.clone(),
            source: event.envelope.source.clone(),
            event_type: event.envelope.event_type.clone(),
            timestamp_utc: event.envelope.timestamp_utc,
            stream_key: event.envelope.stream_key.clone(),
            received_at_utc: event.received_at_utc,
            processed_at_utc,
            trace_id: event.trace_id.clone(),
        }
    }
}
