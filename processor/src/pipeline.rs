//! Per-message state machine.
//!
//! Each polled record moves through decode → validate → persist → fan-out,
//! ending in exactly one terminal outcome. The offset is committed for every
//! outcome except `Retry`, which only occurs when the dead-letter write
//! itself fails; that message is re-polled and is the single loop in the
//! machine. Poison messages otherwise terminate with a committed offset, so
//! they cannot wedge the partition.
//!
//! ```text
//!       ┌── invalid encoding ──────────────┐
//!       │                                  ▼
//! Poll → Decode → Validate ─ fail ─► DeadLetter ─ ok ──► Commit
//!                 │                    │
//!                 ok                   write fails ──► Retry (no commit)
//!                 ▼
//!               Persist ─ dup ──► Commit (no fan-out)
//!                 │
//!                 ok
//!                 ▼
//!               Fan-out (best effort) ─► Commit
//! ```

use tracing::{error, warn};

use event_schema::{BroadcastMessage, InflightEvent};
use event_store::{PersistOutcome, PersistStore};

use crate::fanout::FanoutSink;
use crate::metrics;

/// Terminal outcome for one polled record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Persisted and fanned out; commit the offset.
    Processed,
    /// Worker-side dedup barrier hit; commit without fan-out.
    Duplicate,
    /// Routed to the dead-letter table; commit the offset.
    DeadLettered,
    /// Dead-letter write failed; do NOT commit, the record is re-polled.
    Retry,
}

impl MessageOutcome {
    /// Whether the offset is committed for this outcome.
    pub fn commits(&self) -> bool {
        !matches!(self, MessageOutcome::Retry)
    }

    /// Label for `processor_events_total{result=...}`. Duplicates count as
    /// success.
    pub fn result_label(&self) -> &'static str {
        match self {
            MessageOutcome::Processed | MessageOutcome::Duplicate => "success",
            MessageOutcome::DeadLettered => "dlq",
            MessageOutcome::Retry => "retry",
        }
    }
}

/// The decode/validate/persist/fan-out pipeline, generic over its two I/O
/// seams so the state machine is testable without Kafka or Postgres.
pub struct Pipeline<S, F> {
    store: S,
    sink: F,
}

impl<S: PersistStore, F: FanoutSink> Pipeline<S, F> {
    pub fn new(store: S, sink: F) -> Self {
        Self { store, sink }
    }

    /// Run one record through the state machine to a terminal outcome.
    pub async fn process(&self, raw: &[u8]) -> MessageOutcome {
        let text = String::from_utf8_lossy(raw).into_owned();

        let event: InflightEvent = match serde_json::from_slice(raw) {
            Ok(event) => event,
            Err(e) => {
                return self
                    .dead_letter(None, &text, &format!("invalid-json: {e}"))
                    .await;
            }
        };

        let event_id = match event.validate_for_processing() {
            Ok(id) => id,
            Err(e) => {
                let tenant = non_empty(&event.envelope.tenant_id);
                return self.dead_letter(tenant, &text, &e.to_string()).await;
            }
        };

        match self.store.persist(&event, event_id).await {
            Ok(PersistOutcome::Duplicate) => MessageOutcome::Duplicate,
            Ok(PersistOutcome::Processed { processed_utc }) => {
                let lag = (processed_utc - event.envelope.timestamp_utc)
                    .num_milliseconds() as f64
                    / 1000.0;
                let freshness = (processed_utc
                    - event.received_at_utc.unwrap_or(processed_utc))
                .num_milliseconds() as f64
                    / 1000.0;
                metrics::record_persist(lag, freshness);

                let broadcast = BroadcastMessage::from_inflight(&event, processed_utc);
                if let Err(e) = self.sink.publish(&broadcast).await {
                    warn!(
                        event_id = %event.envelope.event_id,
                        error = %e,
                        "Broadcast fan-out failed; ignoring"
                    );
                }
                MessageOutcome::Processed
            }
            Err(e) => {
                let tenant = non_empty(&event.envelope.tenant_id);
                self.dead_letter(tenant, &text, &format!("persist failure: {e}"))
                    .await
            }
        }
    }

    async fn dead_letter(
        &self,
        tenant_id: Option<&str>,
        raw: &str,
        reason: &str,
    ) -> MessageOutcome {
        match self.store.record_dead_letter(tenant_id, raw, reason).await {
            Ok(()) => {
                warn!(reason = %reason, "Message dead-lettered");
                MessageOutcome::DeadLettered
            }
            Err(e) => {
                error!(
                    reason = %reason,
                    error = %e,
                    "Dead-letter write failed; offset will not be committed"
                );
                MessageOutcome::Retry
            }
        }
    }
}

fn non_empty(value: &str) -> Option<&str> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use event_schema::EventEnvelope;
    use event_store::{StoreError, StoreResult};
    use serde_json::json;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Clone, Copy)]
    enum PersistBehavior {
        Succeed,
        Duplicate,
        Fail,
    }

    struct FakeStore {
        behavior: PersistBehavior,
        dead_letter_fails: bool,
        persisted: Mutex<Vec<Uuid>>,
        dead_letters: Mutex<Vec<(Option<String>, String, String)>>,
    }

    impl FakeStore {
        fn new(behavior: PersistBehavior) -> Self {
            Self {
                behavior,
                dead_letter_fails: false,
                persisted: Mutex::new(Vec::new()),
                dead_letters: Mutex::new(Vec::new()),
            }
        }

        fn with_failing_dead_letter(mut self) -> Self {
            self.dead_letter_fails = true;
            self
        }
    }

    #[async_trait]
    impl PersistStore for FakeStore {
        async fn persist(
            &self,
            _event: &InflightEvent,
            event_id: Uuid,
        ) -> StoreResult<PersistOutcome> {
            match self.behavior {
                PersistBehavior::Succeed => {
                    self.persisted.lock().unwrap().push(event_id);
                    Ok(PersistOutcome::Processed {
                        processed_utc: Utc::now(),
                    })
                }
                PersistBehavior::Duplicate => Ok(PersistOutcome::Duplicate),
                PersistBehavior::Fail => Err(StoreError::Database(sqlx::Error::PoolClosed)),
            }
        }

        async fn record_dead_letter(
            &self,
            tenant_id: Option<&str>,
            raw: &str,
            reason: &str,
        ) -> StoreResult<()> {
            if self.dead_letter_fails {
                return Err(StoreError::Database(sqlx::Error::PoolClosed));
            }
            self.dead_letters.lock().unwrap().push((
                tenant_id.map(String::from),
                raw.to_string(),
                reason.to_string(),
            ));
            Ok(())
        }
    }

    struct FakeSink {
        fail: bool,
        published: Mutex<Vec<BroadcastMessage>>,
    }

    impl FakeSink {
        fn new() -> Self {
            Self {
                fail: false,
                published: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                published: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl crate::fanout::FanoutSink for FakeSink {
        async fn publish(
            &self,
            message: &BroadcastMessage,
        ) -> Result<(), crate::fanout::FanoutError> {
            if self.fail {
                return Err(crate::fanout::FanoutError::Status(502));
            }
            self.published.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn inflight() -> InflightEvent {
        let timestamp: DateTime<Utc> = "2026-02-26T14:22:31Z".parse().unwrap();
        InflightEvent {
            envelope: EventEnvelope {
                event_id: "8f86a6a7-18a1-4463-8578-16eb2cca2727".to_string(),
                tenant_id: "contoso".to_string(),
                source: "orders-api".to_string(),
                event_type: "OrderCreated".to_string(),
                stream_key: "order-184922".to_string(),
                timestamp_utc: timestamp,
                schema_version: 1,
                payload: json!({"orderId": "184922"}),
            },
            idempotency_key: "demo-1".to_string(),
            payload_hash: "a".repeat(64),
            received_at_utc: Some(timestamp),
            trace_id: "4bf92f3577b34da6a3ce929d0e0e4736".to_string(),
        }
    }

    fn raw(event: &InflightEvent) -> Vec<u8> {
        serde_json::to_vec(event).unwrap()
    }

    #[tokio::test]
    async fn test_valid_event_is_processed_and_fanned_out() {
        let pipeline = Pipeline::new(FakeStore::new(PersistBehavior::Succeed), FakeSink::new());
        let outcome = pipeline.process(&raw(&inflight())).await;

        assert_eq!(outcome, MessageOutcome::Processed);
        assert!(outcome.commits());
        assert_eq!(pipeline.store.persisted.lock().unwrap().len(), 1);

        let published = pipeline.sink.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event_id, "8f86a6a7-18a1-4463-8578-16eb2cca2727");
        assert_eq!(published[0].trace_id, "4bf92f3577b34da6a3ce929d0e0e4736");
    }

    #[tokio::test]
    async fn test_duplicate_commits_without_fan_out() {
        let pipeline =
            Pipeline::new(FakeStore::new(PersistBehavior::Duplicate), FakeSink::new());
        let outcome = pipeline.process(&raw(&inflight())).await;

        assert_eq!(outcome, MessageOutcome::Duplicate);
        assert!(outcome.commits());
        assert!(pipeline.sink.published.lock().unwrap().is_empty());
        assert!(pipeline.store.dead_letters.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_json_dead_letters_without_tenant() {
        let pipeline = Pipeline::new(FakeStore::new(PersistBehavior::Succeed), FakeSink::new());
        let outcome = pipeline.process(b"{ not json").await;

        assert_eq!(outcome, MessageOutcome::DeadLettered);
        assert!(outcome.commits());

        let dead_letters = pipeline.store.dead_letters.lock().unwrap();
        assert_eq!(dead_letters.len(), 1);
        let (tenant, raw_text, reason) = &dead_letters[0];
        assert_eq!(tenant, &None);
        assert_eq!(raw_text, "{ not json");
        assert!(reason.starts_with("invalid-json"));
        assert!(pipeline.store.persisted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_event_id_dead_letters_with_tenant() {
        let mut event = inflight();
        event.envelope.event_id = "not-a-uuid".to_string();

        let pipeline = Pipeline::new(FakeStore::new(PersistBehavior::Succeed), FakeSink::new());
        let outcome = pipeline.process(&raw(&event)).await;

        assert_eq!(outcome, MessageOutcome::DeadLettered);

        let dead_letters = pipeline.store.dead_letters.lock().unwrap();
        assert_eq!(dead_letters.len(), 1);
        let (tenant, _, reason) = &dead_letters[0];
        assert_eq!(tenant.as_deref(), Some("contoso"));
        assert!(reason.contains("not-a-uuid"));
        assert!(pipeline.store.persisted.lock().unwrap().is_empty());
        assert!(pipeline.sink.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persist_failure_dead_letters() {
        let pipeline = Pipeline::new(FakeStore::new(PersistBehavior::Fail), FakeSink::new());
        let outcome = pipeline.process(&raw(&inflight())).await;

        assert_eq!(outcome, MessageOutcome::DeadLettered);

        let dead_letters = pipeline.store.dead_letters.lock().unwrap();
        assert_eq!(dead_letters.len(), 1);
        assert!(dead_letters[0].2.starts_with("persist failure"));
        assert!(pipeline.sink.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dead_letter_write_failure_retries_without_commit() {
        let pipeline = Pipeline::new(
            FakeStore::new(PersistBehavior::Fail).with_failing_dead_letter(),
            FakeSink::new(),
        );
        let outcome = pipeline.process(&raw(&inflight())).await;

        assert_eq!(outcome, MessageOutcome::Retry);
        assert!(!outcome.commits());
    }

    #[tokio::test]
    async fn test_fan_out_failure_is_ignored() {
        let pipeline =
            Pipeline::new(FakeStore::new(PersistBehavior::Succeed), FakeSink::failing());
        let outcome = pipeline.process(&raw(&inflight())).await;

        assert_eq!(outcome, MessageOutcome::Processed);
        assert!(outcome.commits());
        assert!(pipeline.store.dead_letters.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_payload_dead_letters() {
        let pipeline = Pipeline::new(FakeStore::new(PersistBehavior::Succeed), FakeSink::new());
        let outcome = pipeline.process(b"").await;
        assert_eq!(outcome, MessageOutcome::DeadLettered);
    }

    #[test]
    fn test_result_labels() {
        assert_eq!(MessageOutcome::Processed.result_label(), "success");
        assert_eq!(MessageOutcome::Duplicate.result_label(), "success");
        assert_eq!(MessageOutcome::DeadLettered.result_label(), "dlq");
        assert_eq!(MessageOutcome::Retry.result_label(), "retry");
    }
}
