//! Metric helpers for the room client.
//!
//! All metrics follow Prometheus naming conventions: `room_` prefix,
//! `_total` suffix for counters, `_seconds` suffix for durations.
//! No recorder is installed here; the embedding application decides.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// ============================================================================
// Signaling
// ============================================================================

/// Record a completed client request.
///
/// Metric: `room_rpc_requests_total`, `room_rpc_request_duration_seconds`
/// Labels: `method` (bounded by `ClientMethod`), `status` (ok, rejected, error)
pub fn record_rpc_request(method: &'static str, status: &'static str, duration: Duration) {
    counter!("room_rpc_requests_total", "method" => method, "status" => status).increment(1);
    histogram!("room_rpc_request_duration_seconds", "method" => method)
        .record(duration.as_secs_f64());
}

/// Record a scheduled reconnection attempt.
///
/// Metric: `room_transport_reconnects_total`
pub fn record_reconnect_attempt() {
    counter!("room_transport_reconnects_total").increment(1);
}

/// Record an inbound notification.
///
/// Metric: `room_notifications_total`
/// Labels: `method` (bounded by `NotificationMethod::metric_label`)
pub fn record_notification(method: &'static str) {
    counter!("room_notifications_total", "method" => method).increment(1);
}

/// Record how an inbound server request was answered.
///
/// Metric: `room_server_requests_total`
/// Labels: `method` (newConsumer, newDataConsumer, unknown), `outcome` (accept, reject)
pub fn record_server_request(method: &'static str, outcome: &'static str) {
    counter!("room_server_requests_total", "method" => method, "outcome" => outcome).increment(1);
}

// ============================================================================
// Resources (Gauges)
// ============================================================================

/// Set the number of open producers.
pub fn set_producers_active(count: usize) {
    // usize to f64 conversion is safe for realistic producer counts
    #[allow(clippy::cast_precision_loss)]
    gauge!("room_producers_active").set(count as f64);
}

/// Set the number of open consumers.
pub fn set_consumers_active(count: usize) {
    // usize to f64 conversion is safe for realistic consumer counts
    #[allow(clippy::cast_precision_loss)]
    gauge!("room_consumers_active").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_util::debugging::DebuggingRecorder;

    #[test]
    fn test_metric_names_recorded() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_rpc_request("join", "ok", Duration::from_millis(12));
            record_reconnect_attempt();
            record_notification("newPeer");
            record_server_request("newConsumer", "accept");
            set_producers_active(2);
            set_consumers_active(3);
        });

        let names: Vec<String> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .map(|(key, _, _, _)| key.key().name().to_string())
            .collect();

        for expected in [
            "room_rpc_requests_total",
            "room_rpc_request_duration_seconds",
            "room_transport_reconnects_total",
            "room_notifications_total",
            "room_server_requests_total",
            "room_producers_active",
            "room_consumers_active",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
    }
}
