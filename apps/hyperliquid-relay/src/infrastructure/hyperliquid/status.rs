//! Shared view of the upstream connection for health reporting.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::domain::connection::ConnectionState;
use crate::infrastructure::metrics;

/// Tracks the state of the upstream feed connection.
#[derive(Debug, Default)]
pub struct UpstreamStatus {
    state: RwLock<ConnectionState>,
    last_connected_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    subscription_count: AtomicUsize,
    reconnect_attempts: AtomicU32,
    messages_received: AtomicU64,
}

impl UpstreamStatus {
    /// Create status for a not-yet-connected feed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection state.
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        if state == ConnectionState::Connected {
            *self.last_connected_at.write() = Some(Utc::now());
            self.reconnect_attempts.store(0, Ordering::Relaxed);
            *self.last_error.write() = None;
        }
        metrics::set_upstream_connected(state == ConnectionState::Connected);
    }

    /// Remember the most recent connection error.
    pub fn set_error(&self, message: String) {
        *self.last_error.write() = Some(message);
    }

    /// Increment reconnect attempts.
    pub fn increment_reconnect_attempts(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
        metrics::record_reconnect();
    }

    /// Increment messages received counter.
    pub fn increment_messages(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Update the active upstream subscription count.
    pub fn set_subscription_count(&self, count: usize) {
        self.subscription_count.store(count, Ordering::Relaxed);
        metrics::set_upstream_subscriptions(count);
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the feed is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// When the feed last connected.
    #[must_use]
    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        *self.last_connected_at.read()
    }

    /// Most recent error since the last successful connect.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Active upstream subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscription_count.load(Ordering::Relaxed)
    }

    /// Reconnect attempts since the last successful connect.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Messages received since startup.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_clears_error_and_attempts() {
        let status = UpstreamStatus::new();
        status.set_error("boom".into());
        status.increment_reconnect_attempts();
        status.increment_reconnect_attempts();
        assert_eq!(status.reconnect_attempts(), 2);
        assert!(status.last_connected_at().is_none());

        status.set_state(ConnectionState::Connected);

        assert!(status.is_connected());
        assert_eq!(status.reconnect_attempts(), 0);
        assert!(status.last_error().is_none());
        assert!(status.last_connected_at().is_some());
    }

    #[test]
    fn counters_accumulate() {
        let status = UpstreamStatus::new();
        status.increment_messages();
        status.increment_messages();
        status.set_subscription_count(4);

        assert_eq!(status.messages_received(), 2);
        assert_eq!(status.subscription_count(), 4);
        assert_eq!(status.state(), ConnectionState::Disconnected);
    }
}
