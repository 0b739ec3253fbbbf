//! Idempotent hot-store schema creation.
//!
//! Runs at startup of both services. Every statement is create-if-absent so
//! concurrent startups and restarts are safe. The tables are the contract
//! between the processor and any read-side consumer; the indexes back the
//! read side's recent-events-by-tenant queries.

use sqlx::PgPool;
use tracing::info;

use crate::error::StoreResult;

const SCHEMA_STATEMENTS: &[&str] = &[
    // Ingestion-time dedup registry. Rows live indefinitely; retention is an
    // operator concern.
    r#"
    CREATE TABLE IF NOT EXISTS ingest_idempotency (
        tenant_id       TEXT        NOT NULL,
        idempotency_key TEXT        NOT NULL,
        payload_hash    TEXT        NOT NULL,
        first_seen_utc  TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (tenant_id, idempotency_key)
    )
    "#,
    // Append-only event log rows.
    r#"
    CREATE TABLE IF NOT EXISTS events (
        event_id        UUID        PRIMARY KEY,
        tenant_id       TEXT        NOT NULL,
        source          TEXT        NOT NULL,
        event_type      TEXT        NOT NULL,
        stream_key      TEXT        NOT NULL,
        timestamp_utc   TIMESTAMPTZ NOT NULL,
        received_utc    TIMESTAMPTZ NOT NULL,
        processed_utc   TIMESTAMPTZ NOT NULL,
        schema_version  INT         NOT NULL,
        payload         JSONB       NOT NULL,
        trace_id        TEXT        NOT NULL,
        idempotency_key TEXT        NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_events_tenant_time
        ON events (tenant_id, timestamp_utc DESC)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_events_tenant_source_time
        ON events (tenant_id, source, timestamp_utc DESC)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_events_tenant_type_time
        ON events (tenant_id, event_type, timestamp_utc DESC)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_events_tenant_stream_time
        ON events (tenant_id, stream_key, timestamp_utc DESC)
    "#,
    // Worker-side dedup barrier. One row per events row, written in the same
    // transaction.
    r#"
    CREATE TABLE IF NOT EXISTS processed_events (
        event_id        UUID        PRIMARY KEY,
        tenant_id       TEXT        NOT NULL,
        idempotency_key TEXT        NOT NULL,
        processed_utc   TIMESTAMPTZ NOT NULL,
        UNIQUE (tenant_id, idempotency_key)
    )
    "#,
    // Latest observation per (tenant, stream); overwritten on every
    // non-duplicate persist.
    r#"
    CREATE TABLE IF NOT EXISTS stream_state (
        tenant_id     TEXT        NOT NULL,
        stream_key    TEXT        NOT NULL,
        last_seen_utc TIMESTAMPTZ NOT NULL,
        last_type     TEXT        NOT NULL,
        last_payload  JSONB       NOT NULL,
        PRIMARY KEY (tenant_id, stream_key)
    )
    "#,
    // Messages that failed validation or persistence, with the reason and a
    // normalized snapshot of the original input. tenant_id is null for
    // structurally invalid messages.
    r#"
    CREATE TABLE IF NOT EXISTS dead_letter (
        id             UUID        PRIMARY KEY,
        tenant_id      TEXT        NULL,
        event_snapshot JSONB       NOT NULL,
        reason         TEXT        NOT NULL,
        created_utc    TIMESTAMPTZ NOT NULL
    )
    "#,
];

/// Create all hot-store tables and indexes if absent.
pub async fn ensure_schema(pool: &PgPool) -> StoreResult<()> {
    for statement in SCHEMA_STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    info!("Hot store schema verified");
    Ok(())
}
