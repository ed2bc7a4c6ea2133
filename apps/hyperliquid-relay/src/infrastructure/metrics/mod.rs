//! Prometheus Metrics Module
//!
//! Exposes relay metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Upstream**: messages received per channel, decode errors, connection
//!   state, reconnects, active upstream subscriptions
//! - **Sessions**: connected clients, evictions, rejected control messages
//! - **Delivery**: frames sent per event and fan-out latency
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder (once) and return its handle.
///
/// # Errors
///
/// Returns an error if another recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "relay_upstream_messages_total",
        "Messages received from the upstream feed by channel"
    );
    describe_counter!(
        "relay_upstream_decode_errors_total",
        "Upstream frames that could not be decoded"
    );
    describe_gauge!(
        "relay_upstream_connected",
        "1 when the upstream feed is connected"
    );
    describe_gauge!(
        "relay_upstream_subscriptions",
        "Subscriptions currently active on the upstream feed"
    );
    describe_counter!("relay_reconnects_total", "Upstream reconnection attempts");

    describe_gauge!("relay_sessions", "Connected client sessions");
    describe_counter!(
        "relay_sessions_evicted_total",
        "Sessions dropped after a failed send, by reason"
    );
    describe_counter!(
        "relay_client_errors_total",
        "Client control messages rejected"
    );

    describe_counter!(
        "relay_messages_sent_total",
        "Frames queued for client sessions by event"
    );
    describe_histogram!(
        "relay_routing_seconds",
        "Time to fan a routed message out to its audience"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a message received from the upstream feed.
pub fn record_upstream_message(channel: &str) {
    counter!("relay_upstream_messages_total", "channel" => channel.to_string()).increment(1);
}

/// Record an undecodable upstream frame.
pub fn record_decode_error() {
    counter!("relay_upstream_decode_errors_total").increment(1);
}

/// Update the upstream connection gauge.
pub fn set_upstream_connected(connected: bool) {
    gauge!("relay_upstream_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Update the active upstream subscription gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_upstream_subscriptions(count: usize) {
    gauge!("relay_upstream_subscriptions").set(count as f64);
}

/// Record an upstream reconnection attempt.
pub fn record_reconnect() {
    counter!("relay_reconnects_total").increment(1);
}

/// Update the connected session gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_sessions(count: usize) {
    gauge!("relay_sessions").set(count as f64);
}

/// Record a session dropped after a failed send.
pub fn record_session_evicted(reason: &'static str) {
    counter!("relay_sessions_evicted_total", "reason" => reason).increment(1);
}

/// Record a rejected client control message.
pub fn record_client_error() {
    counter!("relay_client_errors_total").increment(1);
}

/// Record frames queued for sessions.
pub fn record_messages_sent(event: &'static str, count: u64) {
    counter!("relay_messages_sent_total", "event" => event).increment(count);
}

/// Record fan-out duration.
pub fn record_routing_duration(event: &'static str, duration: Duration) {
    histogram!("relay_routing_seconds", "event" => event).record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_upstream_message("allMids");
        record_messages_sent("price_update", 3);
        record_session_evicted("full");
        set_sessions(2);
        set_upstream_connected(true);
        record_routing_duration("price_update", Duration::from_micros(10));
    }

    #[test]
    fn init_is_idempotent() {
        let first = init_metrics().unwrap();
        let second = init_metrics().unwrap();
        record_reconnect();

        assert!(get_metrics_handle().is_some());
        assert!(second.render().contains("relay_reconnects_total"));
        drop(first);
    }
}
