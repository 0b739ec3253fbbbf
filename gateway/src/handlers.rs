/// HTTP handlers for the ingest gateway
///
/// `POST /v1/events` runs the per-request state machine: header check →
/// envelope validation → fingerprint → idempotency registration → publish,
/// with registry compensation when the publish fails. Liveness, readiness
/// and metrics endpoints live alongside it.
use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::time::Instant;
use tracing::{error, info, warn};

use event_schema::{EventEnvelope, InflightEvent};
use idempotency_registry::{IdempotencyRegistry, RegisterOutcome};
use trace_context::TraceContext;

use crate::error::{AppError, Result};
use crate::metrics;
use crate::producer::EventProducer;

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Body of every `202 Accepted` response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestAccepted {
    pub event_id: String,
    pub received_at_utc: DateTime<Utc>,
    pub trace_id: String,
    pub duplicate: bool,
}

/// Ingest one event envelope.
pub async fn ingest_event(
    req: HttpRequest,
    body: web::Bytes,
    registry: web::Data<IdempotencyRegistry>,
    producer: web::Data<EventProducer>,
) -> HttpResponse {
    let started = Instant::now();

    let response = match handle_ingest(&req, &body, registry.get_ref(), producer.get_ref()).await
    {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "Ingestion request rejected");
            actix_web::error::ResponseError::error_response(&e)
        }
    };

    metrics::observe_request(
        response.status().as_u16(),
        started.elapsed().as_secs_f64() * 1000.0,
    );
    response
}

async fn handle_ingest(
    req: &HttpRequest,
    body: &web::Bytes,
    registry: &IdempotencyRegistry,
    producer: &EventProducer,
) -> Result<HttpResponse> {
    let idempotency_key = require_idempotency_key(
        req.headers()
            .get(IDEMPOTENCY_KEY_HEADER)
            .and_then(|v| v.to_str().ok()),
    )?
    .to_string();

    let envelope: EventEnvelope = serde_json::from_slice(body)
        .map_err(|e| AppError::Validation(format!("invalid event envelope: {e}")))?;
    envelope
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let payload_hash = envelope.payload_fingerprint();

    // Continue the caller's trace when a valid traceparent is supplied,
    // otherwise start a new one for this request.
    let ctx = req
        .headers()
        .get(trace_context::TRACEPARENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(TraceContext::parse)
        .map(|parent| parent.child())
        .unwrap_or_else(TraceContext::generate);

    match registry
        .try_register(&envelope.tenant_id, &idempotency_key, &payload_hash)
        .await?
    {
        RegisterOutcome::Conflict => Err(AppError::Conflict),
        RegisterOutcome::Duplicate => {
            info!(
                tenant_id = %envelope.tenant_id,
                idempotency_key = %idempotency_key,
                "Safe retry observed; not publishing again"
            );
            Ok(accepted(&envelope.event_id, Utc::now(), &ctx.trace_id, true))
        }
        RegisterOutcome::Inserted => {
            let received_at_utc = Utc::now();
            let inflight = InflightEvent {
                envelope,
                idempotency_key: idempotency_key.clone(),
                payload_hash,
                received_at_utc: Some(received_at_utc),
                trace_id: ctx.trace_id.clone(),
            };

            if let Err(e) = producer.publish(&inflight, &ctx).await {
                error!(
                    tenant_id = %inflight.envelope.tenant_id,
                    idempotency_key = %idempotency_key,
                    error = %e,
                    "Log publish failed; compensating idempotency registration"
                );
                registry
                    .unregister(&inflight.envelope.tenant_id, &idempotency_key)
                    .await;
                return Err(AppError::Unavailable(e.to_string()));
            }

            Ok(accepted(
                &inflight.envelope.event_id,
                received_at_utc,
                &ctx.trace_id,
                false,
            ))
        }
    }
}

fn require_idempotency_key(raw: Option<&str>) -> Result<&str> {
    match raw.map(str::trim) {
        Some(key) if !key.is_empty() => Ok(key),
        _ => Err(AppError::Validation(
            "Idempotency-Key header is required".to_string(),
        )),
    }
}

fn accepted(
    event_id: &str,
    received_at_utc: DateTime<Utc>,
    trace_id: &str,
    duplicate: bool,
) -> HttpResponse {
    HttpResponse::Accepted().json(IngestAccepted {
        event_id: event_id.to_string(),
        received_at_utc,
        trace_id: trace_id.to_string(),
        duplicate,
    })
}

/// Liveness probe; also serves `GET /`.
pub async fn liveness() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "ingest-gateway",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Readiness probe with a database round-trip and its latency.
pub async fn readiness(pool: web::Data<PgPool>) -> HttpResponse {
    let start = Instant::now();
    match sqlx::query("SELECT 1").fetch_one(pool.get_ref()).await {
        Ok(_) => HttpResponse::Ok().json(serde_json::json!({
            "ready": true,
            "checks": {
                "postgresql": {
                    "status": "healthy",
                    "latency_ms": start.elapsed().as_millis() as u64
                }
            },
            "timestamp": Utc::now().to_rfc3339()
        })),
        Err(e) => HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "ready": false,
            "checks": {
                "postgresql": {
                    "status": "unhealthy",
                    "message": format!("PostgreSQL connection failed: {}", e)
                }
            },
            "timestamp": Utc::now().to_rfc3339()
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_idempotency_key() {
        assert_eq!(require_idempotency_key(Some("demo-1")).unwrap(), "demo-1");
        assert_eq!(
            require_idempotency_key(Some("  demo-1  ")).unwrap(),
            "demo-1"
        );
        assert!(require_idempotency_key(None).is_err());
        assert!(require_idempotency_key(Some("")).is_err());
        assert!(require_idempotency_key(Some("   ")).is_err());
    }

    #[test]
    fn test_accepted_body_field_names() {
        let body = IngestAccepted {
            event_id: "8f86a6a7-18a1-4463-8578-16eb2cca2727".to_string(),
            received_at_utc: Utc::now(),
            trace_id: "4bf92f3577b34da6a3ce929d0e0e4736".to_string(),
            duplicate: true,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert!(value.get("eventId").is_some());
        assert!(value.get("receivedAtUtc").is_some());
        assert!(value.get("traceId").is_some());
        assert_eq!(value.get("duplicate"), Some(&serde_json::json!(true)));
    }
}
