//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Fails if a recorder is
/// already installed in this process.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants.

/// Inbound envelopes dispatched (counter, labels: kind).
pub const DISPATCH_TOTAL: &str = "dispatch_total";
/// Error envelopes sent back to clients (counter, labels: code).
pub const DISPATCH_ERRORS_TOTAL: &str = "dispatch_errors_total";
/// Tracked requests created (counter).
pub const TRACKER_REQUESTS_TOTAL: &str = "tracker_requests_total";
/// Terminal request outcomes (counter, labels: status).
pub const TRACKER_OUTCOMES_TOTAL: &str = "tracker_outcomes_total";
/// Retries started (counter).
pub const TRACKER_RETRIES_TOTAL: &str = "tracker_retries_total";
/// Attempts that missed their deadline (counter).
pub const TRACKER_TIMEOUTS_TOTAL: &str = "tracker_timeouts_total";
/// Handler attempt duration seconds (histogram, labels: component).
pub const TRACKER_ATTEMPT_DURATION_SECONDS: &str = "tracker_attempt_duration_seconds";
/// Requests currently pending or retrying (gauge).
pub const TRACKER_PENDING: &str = "tracker_pending";
/// Finished requests evicted after their retention period (counter).
pub const TRACKER_EVICTED_TOTAL: &str = "tracker_evicted_total";
/// Messages delivered to live channels (counter).
pub const CONN_DELIVERED_TOTAL: &str = "conn_delivered_total";
/// Messages queued for disconnected clients (counter).
pub const CONN_QUEUED_TOTAL: &str = "conn_queued_total";
/// Messages dropped (counter, labels: reason).
pub const CONN_DROPPED_TOTAL: &str = "conn_dropped_total";
/// Queued messages flushed on reconnect (counter).
pub const CONN_FLUSHED_TOTAL: &str = "conn_flushed_total";
/// Channel write failures (counter).
pub const CONN_TRANSPORT_FAILURES_TOTAL: &str = "conn_transport_failures_total";
/// Sessions removed by the janitor (counter).
pub const CONN_PRUNED_TOTAL: &str = "conn_pruned_total";
/// Active sessions (gauge).
pub const CONN_ACTIVE: &str = "conn_active";
/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// WebSocket connection duration seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            DISPATCH_TOTAL,
            DISPATCH_ERRORS_TOTAL,
            TRACKER_REQUESTS_TOTAL,
            TRACKER_OUTCOMES_TOTAL,
            TRACKER_RETRIES_TOTAL,
            TRACKER_TIMEOUTS_TOTAL,
            TRACKER_ATTEMPT_DURATION_SECONDS,
            TRACKER_PENDING,
            TRACKER_EVICTED_TOTAL,
            CONN_DELIVERED_TOTAL,
            CONN_QUEUED_TOTAL,
            CONN_DROPPED_TOTAL,
            CONN_FLUSHED_TOTAL,
            CONN_TRANSPORT_FAILURES_TOTAL,
            CONN_PRUNED_TOTAL,
            CONN_ACTIVE,
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTION_DURATION_SECONDS,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
