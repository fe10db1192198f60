//! Metrics collection and export for the relay.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use teamchat_core::{BroadcastReport, SessionSummary};
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "teamchat_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "teamchat_connections_active";
    pub const CONNECTIONS_CLOSED: &str = "teamchat_connections_closed_total";
    pub const CHANNELS_ACTIVE: &str = "teamchat_channels_active";
    pub const FRAMES_RELAYED: &str = "teamchat_frames_relayed_total";
    pub const DECODE_ERRORS: &str = "teamchat_decode_errors_total";
    pub const RECIPIENTS_PRUNED: &str = "teamchat_recipients_pruned_total";
    pub const PUSHES_TOTAL: &str = "teamchat_pushes_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    // Describe metrics
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open connections"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_CLOSED,
        "Closed connections by close reason"
    );
    metrics::describe_gauge!(names::CHANNELS_ACTIVE, "Current number of active channels");
    metrics::describe_counter!(names::FRAMES_RELAYED, "Client frames relayed to channel peers");
    metrics::describe_counter!(names::DECODE_ERRORS, "Client frames that failed to decode");
    metrics::describe_counter!(
        names::RECIPIENTS_PRUNED,
        "Recipients removed after a failed send"
    );
    metrics::describe_counter!(names::PUSHES_TOTAL, "Server-initiated broadcasts");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record the outcome of a finished connection.
pub fn record_session(summary: &SessionSummary) {
    counter!(names::CONNECTIONS_CLOSED, "reason" => summary.close_reason.as_str())
        .increment(1);
    counter!(names::FRAMES_RELAYED).increment(summary.frames_relayed);
    counter!(names::DECODE_ERRORS).increment(summary.decode_errors);
    counter!(names::RECIPIENTS_PRUNED).increment(summary.peers_pruned);
}

/// Record a server-initiated broadcast.
pub fn record_push(report: &BroadcastReport) {
    counter!(names::PUSHES_TOTAL).increment(1);
    counter!(names::RECIPIENTS_PRUNED).increment(report.pruned as u64);
}

/// Update active channel count.
pub fn set_active_channels(count: usize) {
    gauge!(names::CHANNELS_ACTIVE).set(count as f64);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teamchat_core::{ChannelKey, CloseReason};
    use teamchat_transport::ConnectionId;

    #[test]
    fn test_recording_without_recorder() {
        // No recorder installed: every call is a no-op
        let _guard = ConnectionMetricsGuard::new();
        record_session(&SessionSummary {
            connection: ConnectionId::generate(),
            channel: Some(ChannelKey::generate()),
            close_reason: CloseReason::PeerClosed,
            frames_relayed: 3,
            decode_errors: 1,
            peers_pruned: 0,
        });
        record_push(&BroadcastReport::default());
        set_active_channels(0);
    }
}
