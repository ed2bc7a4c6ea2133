//! Upstream Heartbeat
//!
//! Hyperliquid drops connections that stay silent for a minute, so the
//! connector sends an application-level `{"method":"ping"}` on a fixed
//! interval. Any inbound frame proves the socket is alive; if nothing
//! arrives within the timeout after a ping, the connection is treated as
//! lost and the connector reconnects.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::UpstreamSettings;

/// Heartbeat timing.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between pings.
    pub ping_interval: Duration,
    /// Silence tolerated after a ping before the socket is declared dead.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(50),
            pong_timeout: Duration::from_secs(30),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }

    /// Build from upstream settings.
    #[must_use]
    pub const fn from_settings(settings: &UpstreamSettings) -> Self {
        Self::new(settings.heartbeat_interval, settings.heartbeat_timeout)
    }
}

/// Requests from the heartbeat task to the connection loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send a ping now.
    SendPing,
    /// Nothing heard since the last ping; reconnect.
    Timeout,
}

/// Liveness bookkeeping shared between the reader and the heartbeat task.
#[derive(Debug)]
pub struct HeartbeatState {
    last_activity: RwLock<Instant>,
    waiting: AtomicBool,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create state for a freshly opened socket.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_activity: RwLock::new(Instant::now()),
            waiting: AtomicBool::new(false),
        }
    }

    /// Any inbound frame arrived.
    pub fn record_activity(&self) {
        *self.last_activity.write() = Instant::now();
        self.waiting.store(false, Ordering::SeqCst);
    }

    /// A ping went out.
    pub fn mark_ping_sent(&self) {
        self.waiting.store(true, Ordering::SeqCst);
    }

    /// Whether a ping is unanswered.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_activity.read().elapsed()
    }
}

/// Periodic ping and timeout detection for one upstream socket.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled, the event channel closes, or a timeout fires.
    pub async fn run(self) {
        let start = tokio::time::Instant::now() + self.config.ping_interval;
        let mut interval = tokio::time::interval_at(start, self.config.ping_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if !self.tick().await {
                        break;
                    }
                }
            }
        }
    }

    /// Returns false when the loop should stop.
    async fn tick(&self) -> bool {
        if self.state.is_waiting() {
            let idle = self.state.idle_for();
            if idle > self.config.pong_timeout {
                tracing::warn!(
                    idle_secs = idle.as_secs(),
                    timeout_secs = self.config.pong_timeout.as_secs(),
                    "Upstream heartbeat timeout"
                );
                let _ = self.event_tx.send(HeartbeatEvent::Timeout).await;
                return false;
            }
        }

        self.event_tx.send(HeartbeatEvent::SendPing).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_clears_waiting() {
        let state = HeartbeatState::new();
        state.mark_ping_sent();
        assert!(state.is_waiting());

        state.record_activity();
        assert!(!state.is_waiting());
        assert!(state.idle_for() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn pings_after_first_interval() {
        let config = HeartbeatConfig::new(Duration::from_millis(40), Duration::from_secs(1));
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            HeartbeatManager::new(config, Arc::new(HeartbeatState::new()), tx, cancel.clone())
                .run(),
        );

        let event = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, HeartbeatEvent::SendPing);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn silence_after_ping_times_out() {
        let config = HeartbeatConfig::new(Duration::from_millis(30), Duration::from_millis(50));
        let state = Arc::new(HeartbeatState::new());
        state.mark_ping_sent();
        *state.last_activity.write() = Instant::now()
            .checked_sub(Duration::from_millis(200))
            .unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let handle = tokio::spawn(
            HeartbeatManager::new(config, state, tx, CancellationToken::new()).run(),
        );

        let event = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, HeartbeatEvent::Timeout);
        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn stops_on_cancel() {
        let (tx, _rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            HeartbeatManager::new(
                HeartbeatConfig::default(),
                Arc::new(HeartbeatState::new()),
                tx,
                cancel.clone(),
            )
            .run(),
        );

        cancel.cancel();
        assert!(
            tokio::time::timeout(Duration::from_millis(100), handle)
                .await
                .is_ok()
        );
    }
}
