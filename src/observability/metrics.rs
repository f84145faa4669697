//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_active_connections` (gauge): current live session count
//! - `gateway_connections_total` (counter): accepted sessions
//! - `gateway_messages_total` (counter): decoded messages by kind
//! - `gateway_rate_limited_total` (counter): read attempts deferred by the limiter
//! - `gateway_session_errors_total` (counter): sessions ended by an error, by reason
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(err) => tracing::error!(address = %addr, error = %err, "Failed to install metrics exporter"),
    }
}

pub fn record_connection_opened(live: u64) {
    metrics::counter!("gateway_connections_total").increment(1);
    metrics::gauge!("gateway_active_connections").set(live as f64);
}

pub fn record_connection_closed(live: u64) {
    metrics::gauge!("gateway_active_connections").set(live as f64);
}

pub fn record_message(kind: &'static str) {
    metrics::counter!("gateway_messages_total", "kind" => kind).increment(1);
}

pub fn record_rate_limited() {
    metrics::counter!("gateway_rate_limited_total").increment(1);
}

pub fn record_session_error(reason: &'static str) {
    metrics::counter!("gateway_session_errors_total", "reason" => reason).increment(1);
}
