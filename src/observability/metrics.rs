//! Metrics collection and exposition.
//!
//! # Metrics
//! - `tunnel_frontend_requests_total` (counter): front-end calls by method, status
//! - `tunnel_frontend_request_duration_seconds` (histogram): front-end latency
//! - `tunnel_active` (gauge): live tunnels on this server
//! - `tunnel_pending_failed_total` (counter): calls failed by tunnel teardown
//! - `tunnel_dispatch_total` (counter): client dispatches by outcome
//! - `tunnel_client_status_changes_total` (counter): client transitions by status

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a completed front-end call.
pub fn record_request(method: &str, status: u16, start: Instant) {
    metrics::counter!(
        "tunnel_frontend_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("tunnel_frontend_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_tunnel_opened() {
    metrics::gauge!("tunnel_active").increment(1.0);
}

pub fn record_tunnel_closed() {
    metrics::gauge!("tunnel_active").decrement(1.0);
}

/// Record pending calls failed when their tunnel went away.
pub fn record_pending_failed(count: usize) {
    if count > 0 {
        metrics::counter!("tunnel_pending_failed_total").increment(count as u64);
    }
}

/// Record a client-side dispatch: `"ok"` or `"unavailable"`.
pub fn record_dispatch(outcome: &'static str) {
    metrics::counter!("tunnel_dispatch_total", "outcome" => outcome).increment(1);
}

pub fn record_status_change(status: &str) {
    metrics::counter!("tunnel_client_status_changes_total", "status" => status.to_string()).increment(1);
}
