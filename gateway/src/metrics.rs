//! Prometheus metrics for the ingest gateway.
//!
//! Exposes the request collectors and an HTTP handler for the `/metrics`
//! endpoint.

use actix_web::HttpResponse;
use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter_vec, Encoder, Histogram, IntCounterVec, TextEncoder,
};

lazy_static! {
    /// Total ingestion requests segmented by terminal HTTP status.
    pub static ref GATEWAY_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "gateway_requests_total",
        "Total ingestion requests segmented by terminal HTTP status",
        &["status"]
    )
    .expect("failed to register gateway_requests_total");

    /// Request duration in milliseconds across all terminal outcomes.
    pub static ref GATEWAY_REQUEST_DURATION_MS: Histogram = register_histogram!(
        "gateway_request_duration_ms",
        "Ingestion request duration in milliseconds",
        vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0]
    )
    .expect("failed to register gateway_request_duration_ms");
}

/// Record one terminal request outcome.
pub fn observe_request(status: u16, elapsed_ms: f64) {
    GATEWAY_REQUESTS_TOTAL
        .with_label_values(&[status.to_string().as_str()])
        .inc();
    GATEWAY_REQUEST_DURATION_MS.observe(elapsed_ms);
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
