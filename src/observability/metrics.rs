//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define mux metrics (accepts, outcomes, match latency, in-flight matches)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `portmux_connections_accepted_total` (counter): connections taken from the upstream listener
//! - `portmux_connections_total` (counter): finished matches by outcome, listener
//! - `portmux_match_duration_seconds` (histogram): time from accept to outcome
//! - `portmux_matching_connections` (gauge): connections currently being matched
//! - `portmux_accept_errors_total` (counter): upstream accept failures by kind
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade, so nothing is exported unless enabled
//! - Labels are bounded: outcome and listener names come from a fixed set

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_accepted() {
    metrics::counter!("portmux_connections_accepted_total").increment(1);
}

/// Record the final outcome of a connection's matching stage.
pub fn record_outcome(outcome: &'static str, listener: &str, started: Instant) {
    metrics::counter!(
        "portmux_connections_total",
        "outcome" => outcome,
        "listener" => listener.to_string()
    )
    .increment(1);
    metrics::histogram!("portmux_match_duration_seconds", "outcome" => outcome)
        .record(started.elapsed().as_secs_f64());
}

pub fn set_matching(count: u64) {
    metrics::gauge!("portmux_matching_connections").set(count as f64);
}

/// `kind` is `transient` or `fatal`.
pub fn record_accept_error(kind: &'static str) {
    metrics::counter!("portmux_accept_errors_total", "kind" => kind).increment(1);
}
