//! # Hot Store
//!
//! Postgres-backed durable side of the pipeline: idempotent schema creation,
//! the persist transaction that turns an inflight record into committed
//! rows, and the dead-letter writer.
//!
//! ## Durability contract
//!
//! The persist transaction writes `processed_events`, `events` and
//! `stream_state` together; all three live-or-die with the transaction. The
//! `processed_events` insert is the dedup barrier: it runs FIRST, inside the
//! transaction, with a do-nothing conflict action, so two concurrent
//! consumers of the same event cannot both insert an `events` row. Replayed
//! messages (uncommitted offsets after a crash) collapse into duplicates
//! here, which is what makes the pipeline exactly-once in effect without a
//! two-phase commit between the log and the store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_schema::InflightEvent;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

mod dead_letter;
mod error;
mod schema;

pub use dead_letter::{normalize_snapshot, truncate_reason, MAX_REASON_BYTES};
pub use error::{StoreError, StoreResult};
pub use schema::ensure_schema;

/// Terminal result of the persist transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    /// All rows written; carries the commit timestamp used for
    /// `processed_utc`, which also stamps the broadcast projection.
    Processed { processed_utc: DateTime<Utc> },
    /// The event was already persisted (worker-side dedup barrier hit);
    /// nothing was written.
    Duplicate,
}

/// Store seam used by the processor pipeline. The production implementation
/// is [`EventStore`]; tests drive the pipeline with in-memory fakes.
#[async_trait]
pub trait PersistStore: Send + Sync {
    /// Run the persist transaction for a validated event.
    async fn persist(
        &self,
        event: &InflightEvent,
        event_id: Uuid,
    ) -> StoreResult<PersistOutcome>;

    /// Append a dead-letter row. An `Err` here is the one condition that
    /// sends the pipeline to `Retry` instead of committing the offset.
    async fn record_dead_letter(
        &self,
        tenant_id: Option<&str>,
        raw: &str,
        reason: &str,
    ) -> StoreResult<()>;
}

/// Postgres-backed hot store. Cheap to clone; holds only the shared pool.
#[derive(Clone)]
pub struct EventStore {
    pool: PgPool,
}

impl EventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PersistStore for EventStore {
    async fn persist(
        &self,
        event: &InflightEvent,
        event_id: Uuid,
    ) -> StoreResult<PersistOutcome> {
        let now = Utc::now();
        let envelope = &event.envelope;

        let mut tx = self.pool.begin().await?;

        // Dedup barrier. ON CONFLICT without a target covers both the
        // event_id primary key and the (tenant_id, idempotency_key) unique
        // constraint; zero rows affected means another consumer won.
        let inserted = sqlx::query(
            r#"
            INSERT INTO processed_events (event_id, tenant_id, idempotency_key, processed_utc)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(&envelope.tenant_id)
        .bind(&event.idempotency_key)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.commit().await?;
            debug!(event_id = %event_id, "Event already persisted; skipping");
            return Ok(PersistOutcome::Duplicate);
        }

        let received_utc = event.received_at_utc.unwrap_or(now);

        sqlx::query(
            r#"
            INSERT INTO events (
                event_id, tenant_id, source, event_type, stream_key,
                timestamp_utc, received_utc, processed_utc,
                schema_version, payload, trace_id, idempotency_key
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(event_id)
        .bind(&envelope.tenant_id)
        .bind(&envelope.source)
        .bind(&envelope.event_type)
        .bind(&envelope.stream_key)
        .bind(envelope.timestamp_utc)
        .bind(received_utc)
        .bind(now)
        .bind(envelope.schema_version as i32)
        .bind(&envelope.payload)
        .bind(&event.trace_id)
        .bind(&event.idempotency_key)
        .execute(&mut *tx)
        .await?;

        // Last-writer-wins by design; monotonicity is a read-side policy.
        sqlx::query(
            r#"
            INSERT INTO stream_state (tenant_id, stream_key, last_seen_utc, last_type, last_payload)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (tenant_id, stream_key)
            DO UPDATE SET
                last_seen_utc = EXCLUDED.last_seen_utc,
                last_type     = EXCLUDED.last_type,
                last_payload  = EXCLUDED.last_payload
            "#,
        )
        .bind(&envelope.tenant_id)
        .bind(&envelope.stream_key)
        .bind(envelope.timestamp_utc)
        .bind(&envelope.event_type)
        .bind(&envelope.payload)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            event_id = %event_id,
            tenant_id = %envelope.tenant_id,
            stream_key = %envelope.stream_key,
            "Event persisted"
        );

        Ok(PersistOutcome::Processed { processed_utc: now })
    }

    async fn record_dead_letter(
        &self,
        tenant_id: Option<&str>,
        raw: &str,
        reason: &str,
    ) -> StoreResult<()> {
        let snapshot = normalize_snapshot(raw);
        let reason = truncate_reason(reason);

        sqlx::query(
            r#"
            INSERT INTO dead_letter (id, tenant_id, event_snapshot, reason, created_utc)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(&snapshot)
        .bind(reason)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
