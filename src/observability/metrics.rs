//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_sessions_total` (counter): sessions by handler and outcome
//! - `gateway_session_duration_seconds` (histogram): session latency by handler
//! - `gateway_frames_total` / `gateway_frame_bytes_total` (counters): relayed
//!   frames by direction
//! - `gateway_dials_total` (counter) and `gateway_dial_duration_seconds`
//!   (histogram): downstream dials by target and result
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade and is a no-op until a
//!   recorder is installed, so library users and tests pay nothing
//! - The Prometheus exporter is optional and serves its own listener

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

pub const SESSIONS_TOTAL: &str = "gateway_sessions_total";
pub const SESSION_DURATION_SECONDS: &str = "gateway_session_duration_seconds";
pub const FRAMES_TOTAL: &str = "gateway_frames_total";
pub const FRAME_BYTES_TOTAL: &str = "gateway_frame_bytes_total";
pub const DIALS_TOTAL: &str = "gateway_dials_total";
pub const DIAL_DURATION_SECONDS: &str = "gateway_dial_duration_seconds";

/// Install the global recorder and serve `/metrics` on `address`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(address: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(address).install()?;
    tracing::info!(address = %address, "Metrics exporter listening");
    Ok(())
}

pub fn record_session(handler: &str, outcome: &'static str, elapsed: Duration) {
    ::metrics::counter!(SESSIONS_TOTAL, "handler" => handler.to_string(), "outcome" => outcome)
        .increment(1);
    ::metrics::histogram!(SESSION_DURATION_SECONDS, "handler" => handler.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_frame(direction: &'static str, len: usize) {
    ::metrics::counter!(FRAMES_TOTAL, "direction" => direction).increment(1);
    ::metrics::counter!(FRAME_BYTES_TOTAL, "direction" => direction).increment(len as u64);
}

pub fn record_dial(target: &str, result: &'static str, elapsed: Duration) {
    ::metrics::counter!(DIALS_TOTAL, "target" => target.to_string(), "result" => result).increment(1);
    ::metrics::histogram!(DIAL_DURATION_SECONDS, "target" => target.to_string())
        .record(elapsed.as_secs_f64());
}
