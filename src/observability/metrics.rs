//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (RPS, latency, errors)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-route and aggregate metrics
//!
//! # Metrics
//! - `proxy_requests_total` (counter): total requests by route, status
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_upstream_errors_total` (counter): 502/504 failures by route, error code;
//!   413 and 400 rejections show up only in `proxy_requests_total`
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Labels for route and status code
//! - Reserved paths are never recorded
//! - Without an installed recorder every call is a no-op

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one proxied request.
pub fn record_request(route: &str, status: u16, start: Instant) {
    let route = route.to_string();
    counter!("proxy_requests_total", "route" => route.clone(), "status" => status.to_string())
        .increment(1);
    histogram!("proxy_request_duration_seconds", "route" => route)
        .record(start.elapsed().as_secs_f64());
}

/// Record an unreachable upstream or an elapsed budget.
pub fn record_upstream_error(route: &str, code: &'static str) {
    counter!("proxy_upstream_errors_total", "route" => route.to_string(), "error" => code)
        .increment(1);
}
