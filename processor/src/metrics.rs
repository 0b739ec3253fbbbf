//! Prometheus metrics for the event processor.
//!
//! `processor_lag_seconds` is a process-wide scalar written by the consumer
//! loop and read by the metrics exposer; the prometheus `Gauge` stores it as
//! an atomic f64, so reads never tear.

use actix_web::HttpResponse;
use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec, Encoder,
    Gauge, Histogram, IntCounter, IntCounterVec, TextEncoder,
};

use crate::pipeline::MessageOutcome;

lazy_static! {
    /// Terminal per-message outcomes (duplicates count as success).
    pub static ref PROCESSOR_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "processor_events_total",
        "Terminal per-message outcomes segmented by result",
        &["result"]
    )
    .expect("failed to register processor_events_total");

    /// Messages routed to the dead-letter table.
    pub static ref DLQ_EVENTS_TOTAL: IntCounter = register_int_counter!(
        "dlq_events_total",
        "Messages routed to the dead-letter table"
    )
    .expect("failed to register dlq_events_total");

    /// now - timestampUtc at the moment of the last successful persist.
    pub static ref PROCESSOR_LAG_SECONDS: Gauge = register_gauge!(
        "processor_lag_seconds",
        "Seconds between the event's client timestamp and its persist"
    )
    .expect("failed to register processor_lag_seconds");

    /// now - receivedAtUtc at the moment of each successful persist.
    pub static ref END_TO_END_FRESHNESS_SECONDS: Histogram = register_histogram!(
        "end_to_end_freshness_seconds",
        "Seconds between ingress acceptance and persist",
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("failed to register end_to_end_freshness_seconds");
}

/// Record one terminal per-message outcome.
pub fn record_outcome(outcome: &MessageOutcome) {
    let result = outcome.result_label();
    PROCESSOR_EVENTS_TOTAL.with_label_values(&[result]).inc();
    if matches!(outcome, MessageOutcome::DeadLettered) {
        DLQ_EVENTS_TOTAL.inc();
    }
}

/// Record lag and freshness after a successful (non-duplicate) persist.
/// Negative values from clock skew clamp to zero.
pub fn record_persist(lag_seconds: f64, freshness_seconds: f64) {
    PROCESSOR_LAG_SECONDS.set(lag_seconds.max(0.0));
    END_TO_END_FRESHNESS_SECONDS.observe(freshness_seconds.max(0.0));
}

/// Actix handler that renders Prometheus metrics in text format.
pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
