//! Upstream Connector
//!
//! Owns the single WebSocket connection to Hyperliquid. Forwards
//! subscription requests from the registry, replays every active
//! subscription after each (re)connect, keeps the socket alive with
//! application pings and hands classified messages to the relay.
//!
//! # Request ordering
//!
//! Every request carries the registry revision it was emitted at. On open the
//! connector replays a registry snapshot and then skips any queued request at
//! or below the snapshot revision, so nothing is sent twice and nothing
//! emitted after the snapshot is lost. Requests that arrive while no socket
//! is open are dropped; the next replay covers them.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use super::codec::{JsonCodec, UpstreamProtocolError};
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use super::reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
use super::status::UpstreamStatus;
use crate::application::ports::{UpstreamEvent, UpstreamPort};
use crate::application::services::SubscriptionRegistry;
use crate::domain::connection::{ConnectionState, ConnectionStateMachine};
use crate::domain::streaming::UpstreamMessage;
use crate::domain::subscription::{Method, Subscription, UpstreamRequest};
use crate::infrastructure::config::UpstreamSettings;
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end one upstream connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] UpstreamProtocolError),

    /// Connection closed by the server.
    #[error("connection closed")]
    ConnectionClosed,

    /// No traffic after a ping.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    /// Reconnect attempts exhausted.
    #[error(transparent)]
    Reconnect(#[from] ReconnectError),
}

// =============================================================================
// Configuration
// =============================================================================

/// Upstream connector configuration.
#[derive(Debug, Clone)]
pub struct UpstreamConnectorConfig {
    /// WebSocket URL.
    pub url: String,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Heartbeat configuration.
    pub heartbeat: HeartbeatConfig,
    /// Subscriptions held for the lifetime of the process, sent on every
    /// connect regardless of client interest.
    pub pinned: Vec<Subscription>,
}

impl UpstreamConnectorConfig {
    /// Create a configuration with defaults for everything but the URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            pinned: vec![Subscription::AllMids],
        }
    }

    /// Build from upstream settings.
    #[must_use]
    pub fn from_settings(settings: &UpstreamSettings) -> Self {
        Self {
            url: settings.url.clone(),
            reconnect: ReconnectConfig::from_settings(settings),
            heartbeat: HeartbeatConfig::from_settings(settings),
            pinned: vec![Subscription::AllMids],
        }
    }
}

// =============================================================================
// Request Handle
// =============================================================================

/// Registry-facing side of the request queue.
#[derive(Debug, Clone)]
pub struct UpstreamHandle {
    tx: mpsc::UnboundedSender<UpstreamRequest>,
}

impl UpstreamPort for UpstreamHandle {
    fn request(&self, request: UpstreamRequest) {
        if self.tx.send(request).is_err() {
            tracing::debug!("Upstream connector stopped, request discarded");
        }
    }
}

/// Create the request queue between the registry and the connector.
#[must_use]
pub fn upstream_channel() -> (UpstreamHandle, mpsc::UnboundedReceiver<UpstreamRequest>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (UpstreamHandle { tx }, rx)
}

// =============================================================================
// Connector
// =============================================================================

/// Maintains the upstream connection.
pub struct UpstreamConnector {
    config: UpstreamConnectorConfig,
    codec: JsonCodec,
    registry: Arc<SubscriptionRegistry>,
    requests: mpsc::UnboundedReceiver<UpstreamRequest>,
    event_tx: mpsc::Sender<UpstreamEvent>,
    status: Arc<UpstreamStatus>,
    cancel: CancellationToken,
}

impl UpstreamConnector {
    /// Create a new connector.
    #[must_use]
    pub fn new(
        config: UpstreamConnectorConfig,
        registry: Arc<SubscriptionRegistry>,
        requests: mpsc::UnboundedReceiver<UpstreamRequest>,
        event_tx: mpsc::Sender<UpstreamEvent>,
        status: Arc<UpstreamStatus>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            codec: JsonCodec::new(),
            registry,
            requests,
            event_tx,
            status,
            cancel,
        }
    }

    /// Connect and keep reconnecting until cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error only when a bounded reconnect policy runs out of
    /// attempts.
    pub async fn run(mut self) -> Result<(), ConnectorError> {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());
        let mut machine = ConnectionStateMachine::new();
        machine.connect();

        loop {
            if self.cancel.is_cancelled() {
                machine.shutdown();
                self.status.set_state(machine.state());
                tracing::info!("Upstream connector cancelled");
                return Ok(());
            }

            self.status.set_state(machine.state());

            match self.connect_and_run(&mut machine, &mut policy).await {
                Ok(()) => {
                    machine.shutdown();
                    self.status.set_state(machine.state());
                    tracing::info!("Upstream connection closed gracefully");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Upstream connection error");
                    self.status.set_error(e.to_string());

                    let was_connected = machine.state() == ConnectionState::Connected;
                    if !machine.lost() {
                        self.status.set_state(machine.state());
                        return Ok(());
                    }
                    self.status.set_state(machine.state());
                    if was_connected {
                        let _ = self.event_tx.send(UpstreamEvent::Disconnected).await;
                    }
                    let _ = self
                        .event_tx
                        .send(UpstreamEvent::Error(e.to_string()))
                        .await;

                    let Some(delay) = policy.next_delay() else {
                        let attempts = policy.attempt_count();
                        tracing::error!(attempts, "Upstream reconnect attempts exhausted");
                        return Err(ReconnectError::MaxAttemptsExceeded(attempts).into());
                    };
                    let attempt = policy.attempt_count();
                    self.status.increment_reconnect_attempts();
                    tracing::info!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Reconnecting to upstream"
                    );
                    let _ = self
                        .event_tx
                        .send(UpstreamEvent::Reconnecting { attempt, delay })
                        .await;

                    if !self.wait_for_retry(delay).await {
                        machine.shutdown();
                        self.status.set_state(machine.state());
                        tracing::info!("Upstream connector cancelled during reconnect delay");
                        return Ok(());
                    }
                    machine.timer_fired();
                }
            }
        }
    }

    /// Sleep out the reconnect delay, discarding requests meanwhile.
    ///
    /// Returns false if cancelled.
    async fn wait_for_retry(&mut self, delay: std::time::Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return false,
                () = &mut sleep => return true,
                Some(request) = self.requests.recv() => {
                    tracing::debug!(
                        method = request.method.as_str(),
                        subscription = %request.subscription,
                        "Upstream disconnected, request dropped"
                    );
                }
            }
        }
    }

    /// Connect to the WebSocket and run until error or cancellation.
    async fn connect_and_run(
        &mut self,
        machine: &mut ConnectionStateMachine,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), ConnectorError> {
        tracing::info!(url = %self.config.url, "Connecting to upstream");

        let (ws_stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            result = tokio_tungstenite::connect_async(self.config.url.as_str()) => result?,
        };
        let (mut write, mut read) = ws_stream.split();

        if !machine.opened() {
            return Ok(());
        }
        policy.reset();
        self.status.set_state(machine.state());

        let (mut active, replayed) = self.replay(&mut write).await?;
        self.status.set_subscription_count(active.len());
        tracing::info!(
            subscriptions = active.len(),
            revision = replayed,
            "Upstream connected, subscriptions replayed"
        );
        let _ = self.event_tx.send(UpstreamEvent::Connected).await;

        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(10);
        let heartbeat_cancel = self.cancel.child_token();
        let _heartbeat_guard = heartbeat_cancel.clone().drop_guard();
        tokio::spawn(
            HeartbeatManager::new(
                self.config.heartbeat.clone(),
                Arc::clone(&heartbeat_state),
                heartbeat_tx,
                heartbeat_cancel,
            )
            .run(),
        );

        let mut requests_open = true;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                heartbeat_event = heartbeat_rx.recv() => {
                    match heartbeat_event {
                        Some(HeartbeatEvent::SendPing) => {
                            heartbeat_state.mark_ping_sent();
                            write.send(Message::Text(self.codec.encode_ping()?.into())).await?;
                        }
                        Some(HeartbeatEvent::Timeout) => {
                            return Err(ConnectorError::HeartbeatTimeout);
                        }
                        None => {
                            tracing::debug!("Heartbeat channel closed");
                        }
                    }
                }
                request = self.requests.recv(), if requests_open => {
                    match request {
                        Some(request) => {
                            self.forward(&mut write, &mut active, replayed, request).await?;
                        }
                        None => {
                            tracing::debug!("Request queue closed");
                            requests_open = false;
                        }
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            heartbeat_state.record_activity();
                            self.handle_text(text.as_str()).await;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            heartbeat_state.record_activity();
                        }
                        Some(Ok(Message::Ping(data))) => {
                            heartbeat_state.record_activity();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(frame = ?frame, "Upstream sent close frame");
                            return Err(ConnectorError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("Upstream stream ended");
                            return Err(ConnectorError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    /// Subscribe pinned channels plus the registry snapshot.
    ///
    /// Returns the set now active upstream and the snapshot revision.
    async fn replay<W>(&self, write: &mut W) -> Result<(BTreeSet<Subscription>, u64), ConnectorError>
    where
        W: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        let snapshot = self.registry.snapshot();
        let mut active = BTreeSet::new();

        let subscriptions = self.config.pinned.iter().chain(snapshot.subscriptions.iter());
        for subscription in subscriptions {
            if active.insert(subscription.clone()) {
                self.send_request(write, Method::Subscribe, subscription).await?;
            }
        }

        Ok((active, snapshot.revision))
    }

    /// Send a queued request unless the replay already covered it.
    async fn forward<W>(
        &self,
        write: &mut W,
        active: &mut BTreeSet<Subscription>,
        replayed: u64,
        request: UpstreamRequest,
    ) -> Result<(), ConnectorError>
    where
        W: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        if request.revision <= replayed {
            tracing::trace!(revision = request.revision, "Request covered by replay");
            return Ok(());
        }
        if self.config.pinned.contains(&request.subscription) {
            tracing::trace!(subscription = %request.subscription, "Pinned subscription left alone");
            return Ok(());
        }

        let changed = match request.method {
            Method::Subscribe => active.insert(request.subscription.clone()),
            Method::Unsubscribe => active.remove(&request.subscription),
        };
        if !changed {
            return Ok(());
        }

        self.send_request(write, request.method, &request.subscription)
            .await?;
        self.status.set_subscription_count(active.len());
        Ok(())
    }

    async fn send_request<W>(
        &self,
        write: &mut W,
        method: Method,
        subscription: &Subscription,
    ) -> Result<(), ConnectorError>
    where
        W: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        let json = self.codec.encode_request(method, subscription)?;
        tracing::debug!(
            method = method.as_str(),
            subscription = %subscription,
            "Sending upstream request"
        );
        write.send(Message::Text(json.into())).await?;
        Ok(())
    }

    async fn handle_text(&self, text: &str) {
        let message = match self.codec.decode(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to decode upstream frame");
                metrics::record_decode_error();
                return;
            }
        };

        if message == UpstreamMessage::Pong {
            tracing::trace!("Upstream pong");
            return;
        }

        self.status.increment_messages();
        metrics::record_upstream_message(message.channel());
        let _ = self.event_tx.send(UpstreamEvent::Message(message)).await;
    }
}

impl std::fmt::Debug for UpstreamConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConnector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
