//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define loader metrics (requests, completions, redirects, bytes)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `loader_requests_total` (counter): requests dispatched, by transport
//! - `loader_requests_completed_total` (counter): completions by transport, outcome
//! - `loader_redirects_total` (counter): redirects by action (follow, restart)
//! - `loader_protocol_responses_total` (counter): handler results by kind
//! - `loader_body_bytes_total` (counter): body bytes by direction (upload, download)
//!
//! # Design Decisions
//! - Recording without an installed recorder is a no-op, so library users
//!   pay nothing unless they opt in

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::NetError;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request_started(transport: &'static str) {
    metrics::counter!("loader_requests_total", "transport" => transport).increment(1);
}

pub fn record_request_completed(transport: &'static str, error: Option<NetError>) {
    let outcome = match error {
        None => "ok",
        Some(NetError::Canceled) => "canceled",
        Some(_) => "error",
    };
    metrics::counter!(
        "loader_requests_completed_total",
        "transport" => transport,
        "outcome" => outcome
    )
    .increment(1);
}

/// `action` is `follow` when the transport followed in place, `restart`
/// when the controller re-dispatched.
pub fn record_redirect(action: &'static str) {
    metrics::counter!("loader_redirects_total", "action" => action).increment(1);
}

pub fn record_protocol_response(kind: &'static str) {
    metrics::counter!("loader_protocol_responses_total", "kind" => kind).increment(1);
}

pub fn record_body_bytes(direction: &'static str, bytes: u64) {
    metrics::counter!("loader_body_bytes_total", "direction" => direction).increment(bytes);
}
