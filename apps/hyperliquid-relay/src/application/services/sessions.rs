//! Client Session Manager
//!
//! Owns every downstream session: its identity, its bounded outbox and the
//! token that tells its socket tasks to stop. Control messages are parsed
//! and applied to the [`SubscriptionRegistry`] here; replies go only to the
//! session that asked.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::registry::SubscriptionRegistry;
use crate::domain::streaming::{ClientProtocolError, ClientRequest, Confirmation, ServerMessage};
use crate::domain::subscription::{SessionId, Subscription};

// =============================================================================
// Errors
// =============================================================================

/// Failure to queue a frame for a session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionSendError {
    /// Session already removed.
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// Outbox is at capacity; the client is not keeping up.
    #[error("session {0} outbox full")]
    Full(SessionId),

    /// Writer task has gone away.
    #[error("session {0} closed")]
    Closed(SessionId),
}

impl SessionSendError {
    /// Short reason, used as a metrics label.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Full(_) => "full",
            Self::Closed(_) => "closed",
        }
    }
}

// =============================================================================
// Session Types
// =============================================================================

#[derive(Debug)]
struct SessionHandle {
    outbox: mpsc::Sender<Arc<str>>,
    closed: CancellationToken,
}

/// The socket-side ends of a new session.
#[derive(Debug)]
pub struct SessionChannel {
    /// Assigned identity.
    pub id: SessionId,
    /// Frames to write to the client, in order.
    pub outbox: mpsc::Receiver<Arc<str>>,
    /// Cancelled when the session is torn down.
    pub closed: CancellationToken,
}

// =============================================================================
// Session Manager
// =============================================================================

/// Tracks live client sessions and applies their control requests.
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
    registry: Arc<SubscriptionRegistry>,
    outbox_capacity: usize,
}

impl SessionManager {
    /// Create a manager whose sessions buffer up to `outbox_capacity` frames.
    #[must_use]
    pub fn new(registry: Arc<SubscriptionRegistry>, outbox_capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            registry,
            outbox_capacity: outbox_capacity.max(1),
        }
    }

    /// Register a new session and queue its connection acknowledgement.
    pub fn on_connect(&self) -> SessionChannel {
        let id = SessionId::new();
        let (tx, rx) = mpsc::channel(self.outbox_capacity);
        let closed = CancellationToken::new();

        self.sessions.write().insert(
            id,
            SessionHandle {
                outbox: tx,
                closed: closed.clone(),
            },
        );

        tracing::info!(session_id = %id, "Client connected");
        self.reply(id, &ServerMessage::connected());

        SessionChannel {
            id,
            outbox: rx,
            closed,
        }
    }

    /// Handle one text frame from a session.
    ///
    /// The confirmation or error reply is queued for that session only.
    ///
    /// # Errors
    ///
    /// Returns the protocol error that was reported to the client.
    pub fn on_message(&self, id: SessionId, raw: &str) -> Result<(), ClientProtocolError> {
        let parsed = ClientRequest::parse(raw);

        let outcome = {
            // Held across the registry update so a concurrent disconnect
            // cannot release subscriptions before they are added.
            let sessions = self.sessions.read();
            if !sessions.contains_key(&id) {
                tracing::debug!(session_id = %id, "Message for unknown session ignored");
                return Ok(());
            }
            parsed.map(|request| self.apply(id, request))
        };

        match outcome {
            Ok(Some(reply)) => {
                self.reply(id, &reply);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                tracing::debug!(session_id = %id, error = %e, "Rejected client message");
                if let Err(send_err) = self.send(id, e.to_json().into()) {
                    self.evict(id, &send_err);
                }
                Err(e)
            }
        }
    }

    /// Apply a validated request and build the confirmation, if any.
    fn apply(&self, id: SessionId, request: ClientRequest) -> Option<ServerMessage> {
        let reply = match request {
            ClientRequest::SubscribeUserData { user_address } => {
                let changes = self.registry.switch_user(id, &user_address);
                if changes.unsubscribe.is_empty() {
                    tracing::info!(session_id = %id, user = %user_address, "Subscribed to user data");
                } else {
                    tracing::info!(
                        session_id = %id,
                        user = %user_address,
                        released = changes.unsubscribe.len(),
                        "Switched user data address"
                    );
                }
                ServerMessage::SubscriptionConfirmed {
                    data: Confirmation::user_data(&user_address),
                }
            }
            ClientRequest::UnsubscribeUserData { user_address } => {
                if self.registry.release_user(id, &user_address).is_none() {
                    tracing::debug!(session_id = %id, user = %user_address, "No user data to unsubscribe");
                    return None;
                }
                tracing::info!(session_id = %id, user = %user_address, "Unsubscribed from user data");
                ServerMessage::UnsubscriptionConfirmed {
                    data: Confirmation::user_data_removed(&user_address),
                }
            }
            ClientRequest::SubscribeCandles { coin, interval } => {
                self.registry
                    .add_interest(id, Subscription::candle(coin.as_str(), interval.as_str()));
                tracing::info!(session_id = %id, coin = %coin, interval = %interval, "Subscribed to candles");
                ServerMessage::SubscriptionConfirmed {
                    data: Confirmation::candles(&coin, &interval),
                }
            }
            ClientRequest::Unsubscribe { subscription } => {
                self.registry.remove_interest(id, &subscription);
                tracing::info!(session_id = %id, subscription = %subscription, "Unsubscribed");
                ServerMessage::UnsubscriptionConfirmed {
                    data: Confirmation::Subscription { subscription },
                }
            }
        };
        Some(reply)
    }

    /// Remove a session and release its subscriptions.
    ///
    /// Cancels the session's token so its socket tasks stop even if a send
    /// is in flight. Returns false if the session was already gone.
    pub fn on_disconnect(&self, id: SessionId) -> bool {
        let changes = {
            let mut sessions = self.sessions.write();
            let Some(handle) = sessions.remove(&id) else {
                return false;
            };
            handle.closed.cancel();
            self.registry.remove_session(id)
        };

        tracing::info!(
            session_id = %id,
            released = changes.unsubscribe.len(),
            "Client disconnected"
        );
        true
    }

    /// Queue a serialized frame without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`SessionSendError`] if the session is gone, closed or full.
    pub fn send(&self, id: SessionId, frame: Arc<str>) -> Result<(), SessionSendError> {
        let sessions = self.sessions.read();
        let handle = sessions.get(&id).ok_or(SessionSendError::NotFound(id))?;
        handle.outbox.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SessionSendError::Full(id),
            mpsc::error::TrySendError::Closed(_) => SessionSendError::Closed(id),
        })
    }

    /// Serialize and queue a reply; evict the session if it cannot take it.
    fn reply(&self, id: SessionId, message: &ServerMessage) {
        let frame = match serde_json::to_string(message) {
            Ok(json) => Arc::<str>::from(json),
            Err(e) => {
                tracing::error!(error = %e, event = message.event_name(), "Failed to serialize reply");
                return;
            }
        };
        if let Err(e) = self.send(id, frame) {
            self.evict(id, &e);
        }
    }

    fn evict(&self, id: SessionId, error: &SessionSendError) {
        if matches!(error, SessionSendError::NotFound(_)) {
            return;
        }
        tracing::warn!(session_id = %id, error = %error, "Dropping session after failed send");
        self.on_disconnect(id);
    }

    /// Ids of every live session.
    #[must_use]
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.read().keys().copied().collect()
    }

    /// Whether a session is live.
    #[must_use]
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.read().contains_key(&id)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether there are no live sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// The registry sessions subscribe through.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.len())
            .field("outbox_capacity", &self.outbox_capacity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MockUpstreamPort;
    use crate::domain::subscription::Method;
    use serde_json::{Value, json};

    fn manager_with(upstream: MockUpstreamPort) -> SessionManager {
        let registry = Arc::new(SubscriptionRegistry::new(Arc::new(upstream)));
        SessionManager::new(registry, 8)
    }

    fn permissive() -> SessionManager {
        let mut upstream = MockUpstreamPort::new();
        upstream.expect_request().return_const(());
        manager_with(upstream)
    }

    fn next_json(channel: &mut SessionChannel) -> Value {
        let frame = channel.outbox.try_recv().unwrap();
        serde_json::from_str(&frame).unwrap()
    }

    #[test]
    fn connect_sends_acknowledgement() {
        let manager = permissive();
        let mut channel = manager.on_connect();

        assert_eq!(
            next_json(&mut channel),
            json!({"type": "connected", "message": "Connected to HyperSwipe WebSocket server"})
        );
        assert!(manager.contains(channel.id));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn subscribe_user_data_confirms_and_registers_both_channels() {
        let manager = permissive();
        let mut channel = manager.on_connect();
        next_json(&mut channel);

        manager
            .on_message(
                channel.id,
                r#"{"type":"subscribe_user_data","payload":{"userAddress":"0xABC"}}"#,
            )
            .unwrap();

        assert_eq!(
            next_json(&mut channel),
            json!({
                "type": "subscription_confirmed",
                "data": {"userAddress": "0xabc", "subscriptions": ["webData2", "userEvents"]}
            })
        );
        let mut owned = manager.registry().session_subscriptions(channel.id);
        owned.sort();
        assert_eq!(
            owned,
            vec![
                Subscription::web_data2("0xabc"),
                Subscription::user_events("0xabc")
            ]
        );
    }

    #[test]
    fn missing_address_is_rejected_without_upstream_request() {
        let mut upstream = MockUpstreamPort::new();
        upstream.expect_request().times(0);
        let manager = manager_with(upstream);
        let mut channel = manager.on_connect();
        next_json(&mut channel);

        let result = manager.on_message(
            channel.id,
            r#"{"type":"subscribe_user_data","payload":{}}"#,
        );

        assert_eq!(result, Err(ClientProtocolError::UserAddressRequired));
        assert_eq!(next_json(&mut channel), json!({"error": "User address required"}));
        assert!(manager.registry().session_subscriptions(channel.id).is_empty());
    }

    #[test]
    fn candle_subscription_goes_upstream() {
        let mut upstream = MockUpstreamPort::new();
        upstream
            .expect_request()
            .withf(|r| {
                r.method == Method::Subscribe && r.subscription == Subscription::candle("SOL", "1h")
            })
            .times(1)
            .return_const(());
        let manager = manager_with(upstream);
        let mut channel = manager.on_connect();
        next_json(&mut channel);

        manager
            .on_message(
                channel.id,
                r#"{"type":"subscribe_candles","payload":{"coin":"SOL","interval":"1h"}}"#,
            )
            .unwrap();

        assert_eq!(
            next_json(&mut channel),
            json!({
                "type": "subscription_confirmed",
                "data": {"coin": "SOL", "interval": "1h", "subscription": "candle"}
            })
        );
    }

    #[test]
    fn unknown_tag_error_names_the_tag() {
        let manager = permissive();
        let mut channel = manager.on_connect();
        next_json(&mut channel);

        let _ = manager.on_message(channel.id, r#"{"type":"bogus"}"#);

        assert_eq!(
            next_json(&mut channel),
            json!({"error": "Unknown message type: bogus"})
        );
    }

    #[test]
    fn unsubscribe_user_data_releases_both() {
        let manager = permissive();
        let mut channel = manager.on_connect();
        next_json(&mut channel);
        manager
            .on_message(
                channel.id,
                r#"{"type":"subscribe_user_data","payload":{"userAddress":"0xabc"}}"#,
            )
            .unwrap();
        next_json(&mut channel);

        manager
            .on_message(
                channel.id,
                r#"{"type":"unsubscribe_user_data","payload":{"userAddress":"0xABC"}}"#,
            )
            .unwrap();

        assert_eq!(
            next_json(&mut channel),
            json!({
                "type": "unsubscription_confirmed",
                "data": {"userAddress": "0xabc", "unsubscribed": ["webData2", "userEvents"]}
            })
        );
        assert!(manager.registry().session_subscriptions(channel.id).is_empty());
    }

    #[test]
    fn second_user_data_subscription_switches_address() {
        let mut upstream = MockUpstreamPort::new();
        let mut seq = mockall::Sequence::new();
        upstream
            .expect_request()
            .withf(|r| r.method == Method::Subscribe && r.subscription.user() == Some("0xaa"))
            .times(2)
            .in_sequence(&mut seq)
            .return_const(());
        upstream
            .expect_request()
            .withf(|r| r.method == Method::Subscribe && r.subscription.user() == Some("0xbb"))
            .times(2)
            .in_sequence(&mut seq)
            .return_const(());
        upstream
            .expect_request()
            .withf(|r| r.method == Method::Unsubscribe && r.subscription.user() == Some("0xaa"))
            .times(2)
            .in_sequence(&mut seq)
            .return_const(());
        let manager = manager_with(upstream);
        let mut channel = manager.on_connect();
        next_json(&mut channel);

        for address in ["0xaa", "0xbb"] {
            manager
                .on_message(
                    channel.id,
                    &json!({"type": "subscribe_user_data", "payload": {"userAddress": address}})
                        .to_string(),
                )
                .unwrap();
            assert_eq!(next_json(&mut channel)["type"], "subscription_confirmed");
        }

        let mut owned = manager.registry().session_subscriptions(channel.id);
        owned.sort();
        assert_eq!(
            owned,
            vec![
                Subscription::web_data2("0xbb"),
                Subscription::user_events("0xbb")
            ]
        );
        assert!(
            manager
                .registry()
                .audience_for(&Subscription::web_data2("0xaa"))
                .is_empty()
        );
    }

    #[test]
    fn unsubscribe_user_data_for_unheld_address_is_silent() {
        let mut upstream = MockUpstreamPort::new();
        upstream
            .expect_request()
            .withf(|r| r.method == Method::Subscribe)
            .times(2)
            .return_const(());
        upstream
            .expect_request()
            .withf(|r| r.method == Method::Unsubscribe)
            .times(0);
        let manager = manager_with(upstream);
        let mut channel = manager.on_connect();
        next_json(&mut channel);
        manager
            .on_message(
                channel.id,
                r#"{"type":"subscribe_user_data","payload":{"userAddress":"0xaa"}}"#,
            )
            .unwrap();
        next_json(&mut channel);

        manager
            .on_message(
                channel.id,
                r#"{"type":"unsubscribe_user_data","payload":{"userAddress":"0xbb"}}"#,
            )
            .unwrap();

        assert!(channel.outbox.try_recv().is_err());
        assert_eq!(manager.registry().session_subscriptions(channel.id).len(), 2);
    }

    #[test]
    fn padded_candle_descriptor_releases_subscription() {
        let manager = permissive();
        let mut channel = manager.on_connect();
        next_json(&mut channel);
        manager
            .on_message(
                channel.id,
                r#"{"type":"subscribe_candles","payload":{"coin":" SOL ","interval":"1h"}}"#,
            )
            .unwrap();
        next_json(&mut channel);

        manager
            .on_message(
                channel.id,
                r#"{"type":"unsubscribe","payload":{"subscription":{"type":"candle","coin":" SOL ","interval":"1h"}}}"#,
            )
            .unwrap();

        assert_eq!(next_json(&mut channel)["type"], "unsubscription_confirmed");
        assert!(
            manager
                .registry()
                .audience_for(&Subscription::candle("SOL", "1h"))
                .is_empty()
        );
    }

    #[test]
    fn disconnect_releases_subscriptions_and_cancels() {
        let manager = permissive();
        let channel = manager.on_connect();
        manager
            .on_message(
                channel.id,
                r#"{"type":"subscribe_candles","payload":{"coin":"SOL","interval":"1h"}}"#,
            )
            .unwrap();

        assert!(manager.on_disconnect(channel.id));
        assert!(!manager.on_disconnect(channel.id));
        assert!(channel.closed.is_cancelled());
        assert!(
            manager
                .registry()
                .audience_for(&Subscription::candle("SOL", "1h"))
                .is_empty()
        );
        assert!(manager.is_empty());
    }

    #[test]
    fn send_to_removed_session_is_not_found() {
        let manager = permissive();
        let channel = manager.on_connect();
        manager.on_disconnect(channel.id);

        assert_eq!(
            manager.send(channel.id, Arc::from("x")),
            Err(SessionSendError::NotFound(channel.id))
        );
    }

    #[test]
    fn full_outbox_reports_full() {
        let registry = Arc::new(SubscriptionRegistry::new(Arc::new(MockUpstreamPort::new())));
        let manager = SessionManager::new(registry, 1);
        // capacity 1 is taken by the acknowledgement
        let channel = manager.on_connect();

        assert_eq!(
            manager.send(channel.id, Arc::from("x")),
            Err(SessionSendError::Full(channel.id))
        );
    }

    #[test]
    fn dropped_receiver_reports_closed() {
        let manager = permissive();
        let channel = manager.on_connect();
        let id = channel.id;
        drop(channel);

        assert_eq!(
            manager.send(id, Arc::from("x")),
            Err(SessionSendError::Closed(id))
        );
    }
}
