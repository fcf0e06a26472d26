//! Metrics collection and exposition.
//!
//! # Metrics
//! - `tts_endpoint_credits` (gauge): last polled credit balance per endpoint
//! - `tts_endpoint_circuit_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `tts_endpoint_active_requests` (gauge): in-flight synthesis calls
//! - `tts_endpoint_failures_total` (counter): failures by endpoint and class
//! - `tts_synthesis_requests_total` (counter): synthesis calls by endpoint and outcome
//! - `dialogue_requests_total` (counter): dialogue streams by mode and outcome
//! - `dialogue_stage_duration_seconds` (histogram): per-stage latency
//! - `dialogue_first_chunk_seconds` (histogram): time to first emitted chunk
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so library code records unconditionally
//! - Prometheus exposition is opt-in from the server binary

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

use crate::resilience::{CircuitState, FailureClass};

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_endpoint_credits(endpoint: &str, credits: f64) {
    gauge!("tts_endpoint_credits", "endpoint" => endpoint.to_string()).set(credits);
}

pub fn record_circuit_state(endpoint: &str, state: CircuitState) {
    gauge!("tts_endpoint_circuit_state", "endpoint" => endpoint.to_string())
        .set(state.as_gauge());
}

pub fn record_active_requests(endpoint: &str, active: usize) {
    gauge!("tts_endpoint_active_requests", "endpoint" => endpoint.to_string()).set(active as f64);
}

pub fn record_endpoint_failure(endpoint: &str, class: FailureClass) {
    counter!(
        "tts_endpoint_failures_total",
        "endpoint" => endpoint.to_string(),
        "class" => class.as_str()
    )
    .increment(1);
}

pub fn record_synthesis_request(endpoint: &str, outcome: &'static str) {
    counter!(
        "tts_synthesis_requests_total",
        "endpoint" => endpoint.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_dialogue_request(mode: &'static str, outcome: &'static str) {
    counter!("dialogue_requests_total", "mode" => mode, "outcome" => outcome).increment(1);
}

pub fn record_stage_duration(stage: &'static str, seconds: f64) {
    histogram!("dialogue_stage_duration_seconds", "stage" => stage).record(seconds);
}

pub fn record_first_chunk(mode: &'static str, seconds: f64) {
    histogram!("dialogue_first_chunk_seconds", "mode" => mode).record(seconds);
}
