//! Metrics collection and exposition.
//!
//! # Metrics
//! - `edge_requests_total` (counter): API requests by method, status
//! - `edge_request_duration_seconds` (histogram): handler latency
//! - `edge_rate_limited_total` (counter): admission rejections by namespace
//! - `edge_auth_rejections_total` (counter): 401/403 by reason
//! - `edge_cors_preflight_total` (counter): preflights by origin verdict
//! - `edge_upstream_retries_total` (counter): outbound retries by cause
//!
//! # Design Decisions
//! - Recording without an installed exporter is a no-op
//! - Labels are low-cardinality (never raw keys or origins)

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    let status = status.to_string();
    counter!("edge_requests_total", "method" => method.to_string(), "status" => status)
        .increment(1);
    histogram!("edge_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(namespace: &str) {
    counter!("edge_rate_limited_total", "namespace" => namespace.to_string()).increment(1);
}

pub fn record_auth_rejection(reason: &'static str) {
    counter!("edge_auth_rejections_total", "reason" => reason).increment(1);
}

pub fn record_preflight(allowed: bool) {
    let verdict = if allowed { "allowed" } else { "not_allowed" };
    counter!("edge_cors_preflight_total", "origin" => verdict).increment(1);
}

pub fn record_retry(cause: &'static str) {
    counter!("edge_upstream_retries_total", "cause" => cause).increment(1);
}
