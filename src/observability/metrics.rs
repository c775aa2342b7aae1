//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_sessions_total` (counter): accepted client connections
//! - `relay_active_sessions` (gauge): sessions currently running
//! - `relay_requests_total` (counter): frames answered
//! - `relay_parse_errors_total` (counter): frames that were not valid requests
//! - `relay_dial_failures_total` (counter): backend dials that exhausted all candidates
//! - `relay_response_bytes_total` (counter): bytes written to clients
//! - `relay_session_errors_total` (counter, `reason`): sessions ended by an error
//!
//! # Design Decisions
//! - Recording is always on; without an installed recorder it is a no-op
//! - The Prometheus endpoint is opt-in via `observability.metrics_enabled`

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder with an HTTP scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_session_opened() {
    counter!("relay_sessions_total").increment(1);
    gauge!("relay_active_sessions").increment(1.0);
}

pub fn record_session_closed() {
    gauge!("relay_active_sessions").decrement(1.0);
}

pub fn record_request() {
    counter!("relay_requests_total").increment(1);
}

pub fn record_parse_error() {
    counter!("relay_parse_errors_total").increment(1);
}

pub fn record_dial_failure() {
    counter!("relay_dial_failures_total").increment(1);
}

pub fn record_response_bytes(n: usize) {
    counter!("relay_response_bytes_total").increment(n as u64);
}

pub fn record_session_error(reason: &'static str) {
    counter!("relay_session_errors_total", "reason" => reason).increment(1);
}
