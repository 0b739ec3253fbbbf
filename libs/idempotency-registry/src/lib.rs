//! # Ingestion Idempotency Registry
//!
//! Durable dedup of ingestion attempts keyed by `(tenant_id,
//! idempotency_key)`, with a payload fingerprint stored for conflict
//! detection. Backed by Postgres so retries are safe across gateway
//! restarts and across concurrent duplicate requests.
//!
//! ## Concurrency
//!
//! A naive "INSERT .. ON CONFLICT DO NOTHING, then SELECT" sequence has a
//! visibility gap under concurrent duplicates: the losing statement may not
//! yet see the winner's row. The registry therefore uses a single atomic
//! merge that blocks on the conflicting key and returns the surviving row:
//!
//! ```sql
//! INSERT INTO ingest_idempotency (...)
//! VALUES (...)
//! ON CONFLICT (tenant_id, idempotency_key)
//! DO UPDATE SET payload_hash = ingest_idempotency.payload_hash
//! RETURNING payload_hash, (xmax = 0) AS inserted
//! ```
//!
//! The no-op `DO UPDATE` takes the conflicting row's lock, so both racers
//! observe a consistent outcome: exactly one sees `inserted = true`
//! (`xmax = 0` holds only for a row created by this statement), the other
//! sees the winner's stored hash.

use sqlx::{PgPool, Row};
use tracing::{debug, warn};

mod error;

pub use error::{RegistryError, RegistryResult};

/// Outcome of registering one ingestion attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// This call created the registration; the caller must publish.
    Inserted,
    /// The key was already registered with the same payload hash: a safe
    /// retry. The caller must NOT publish again.
    Duplicate,
    /// The key was already registered with a different payload hash: the
    /// caller reused a key with a different body.
    Conflict,
}

/// Registry handle. Cheap to clone; holds only the shared pool.
#[derive(Clone)]
pub struct IdempotencyRegistry {
    pool: PgPool,
}

impl IdempotencyRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Atomically register `(tenant_id, idempotency_key)` with the supplied
    /// payload hash, classifying the result against any surviving row.
    pub async fn try_register(
        &self,
        tenant_id: &str,
        idempotency_key: &str,
        payload_hash: &str,
    ) -> RegistryResult<RegisterOutcome> {
        let row = sqlx::query(
            r#"
            INSERT INTO ingest_idempotency (tenant_id, idempotency_key, payload_hash, first_seen_utc)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (tenant_id, idempotency_key)
            DO UPDATE SET payload_hash = ingest_idempotency.payload_hash
            RETURNING payload_hash, (xmax = 0) AS inserted
            "#,
        )
        .bind(tenant_id)
        .bind(idempotency_key)
        .bind(payload_hash)
        .fetch_one(&self.pool)
        .await?;

        let inserted: bool = row.try_get("inserted")?;
        let stored_hash: String = row.try_get("payload_hash")?;

        let outcome = classify(inserted, &stored_hash, payload_hash);
        debug!(
            tenant_id = %tenant_id,
            idempotency_key = %idempotency_key,
            outcome = ?outcome,
            "Idempotency registration"
        );
        Ok(outcome)
    }

    /// Remove a registration. Best-effort compensation for a publish failure
    /// after a successful `Inserted`: if the delete itself fails, the row is
    /// a harmless orphan (a retry with the same body still classifies as
    /// `Duplicate`), so failures are logged and swallowed.
    pub async fn unregister(&self, tenant_id: &str, idempotency_key: &str) {
        let result = sqlx::query(
            "DELETE FROM ingest_idempotency WHERE tenant_id = $1 AND idempotency_key = $2",
        )
        .bind(tenant_id)
        .bind(idempotency_key)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() > 0 => {
                debug!(
                    tenant_id = %tenant_id,
                    idempotency_key = %idempotency_key,
                    "Idempotency registration compensated"
                );
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    tenant_id = %tenant_id,
                    idempotency_key = %idempotency_key,
                    error = %e,
                    "Failed to compensate idempotency registration; row left behind"
                );
            }
        }
    }
}

/// Map the merge statement's result onto the registration outcome.
fn classify(inserted: bool, stored_hash: &str, supplied_hash: &str) -> RegisterOutcome {
    if inserted {
        RegisterOutcome::Inserted
    } else if stored_hash == supplied_hash {
        RegisterOutcome::Duplicate
    } else {
        RegisterOutcome::Conflict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_inserted() {
        assert_eq!(classify(true, "abc", "abc"), RegisterOutcome::Inserted);
        // The stored hash of a freshly inserted row is always the supplied
        // one, but classification must not depend on comparing them.
        assert_eq!(classify(true, "abc", "def"), RegisterOutcome::Inserted);
    }

    #[test]
    fn test_classify_duplicate_on_matching_hash() {
        assert_eq!(classify(false, "abc", "abc"), RegisterOutcome::Duplicate);
    }

    #[test]
    fn test_classify_conflict_on_hash_mismatch() {
        assert_eq!(classify(false, "abc", "def"), RegisterOutcome::Conflict);
    }
}
