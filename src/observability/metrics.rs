//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by mode and status
//! - `proxy_request_duration_seconds` (histogram): latency by mode
//! - `proxy_buffer_overflows_total` (counter): buffered responses that fell back to streaming
//! - `proxy_handler_failures_total` (counter): hook errors and panics by phase
//! - `proxy_client_disconnects_total` (counter): requests abandoned by the client
//!
//! # Design Decisions
//! - Without an installed exporter every update is a no-op
//! - Histogram buckets tuned for typical web latencies

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};

const LATENCY_BUCKETS: [f64; 12] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Serve Prometheus metrics on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full("proxy_request_duration_seconds".to_string()),
            &LATENCY_BUCKETS,
        )?
        .install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_response(mode: &str, status: u16, started: Instant) {
    ::metrics::counter!(
        "proxy_requests_total",
        "mode" => mode.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    ::metrics::histogram!("proxy_request_duration_seconds", "mode" => mode.to_string())
        .record(started.elapsed().as_secs_f64());
}

pub fn record_buffer_overflow() {
    ::metrics::counter!("proxy_buffer_overflows_total").increment(1);
}

pub fn record_handler_failure(phase: &'static str) {
    ::metrics::counter!("proxy_handler_failures_total", "phase" => phase).increment(1);
}

pub fn record_client_disconnect(mode: &'static str) {
    ::metrics::counter!("proxy_client_disconnects_total", "mode" => mode).increment(1);
}
