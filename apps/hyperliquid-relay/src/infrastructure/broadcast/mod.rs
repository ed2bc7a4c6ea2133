//! Broadcaster
//!
//! Fans a routed message out to its audience. The message is serialized
//! once and the same frame is queued on every target session without
//! waiting. A session that cannot take the frame does not hold up the
//! others; it is torn down after the pass.

use std::sync::Arc;
use std::time::Instant;

use crate::application::ports::BroadcastPort;
use crate::application::services::{SessionManager, SessionSendError};
use crate::domain::streaming::ServerMessage;
use crate::domain::subscription::Audience;
use crate::infrastructure::metrics;

/// [`BroadcastPort`] over the live session table.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    sessions: Arc<SessionManager>,
}

impl Broadcaster {
    /// Create a broadcaster over `sessions`.
    #[must_use]
    pub const fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }
}

impl BroadcastPort for Broadcaster {
    fn broadcast(&self, audience: &Audience, message: &ServerMessage) -> usize {
        let start = Instant::now();
        let event = message.event_name();

        let frame: Arc<str> = match serde_json::to_string(message) {
            Ok(json) => json.into(),
            Err(e) => {
                tracing::error!(error = %e, event, "Failed to serialize broadcast");
                return 0;
            }
        };

        let targets = match audience {
            Audience::Everyone => self.sessions.session_ids(),
            Audience::Sessions(ids) => ids.clone(),
        };

        let mut delivered = 0usize;
        let mut failed: Vec<SessionSendError> = Vec::new();
        for id in targets {
            match self.sessions.send(id, Arc::clone(&frame)) {
                Ok(()) => delivered += 1,
                // Disconnected between routing and delivery.
                Err(SessionSendError::NotFound(_)) => {}
                Err(e) => failed.push(e),
            }
        }

        for error in &failed {
            let id = match error {
                SessionSendError::NotFound(id)
                | SessionSendError::Full(id)
                | SessionSendError::Closed(id) => *id,
            };
            tracing::warn!(session_id = %id, error = %error, event, "Evicting session");
            if self.sessions.on_disconnect(id) {
                metrics::record_session_evicted(error.reason());
            }
        }
        if !failed.is_empty() {
            metrics::set_sessions(self.sessions.len());
        }

        metrics::record_messages_sent(event, u64::try_from(delivered).unwrap_or(u64::MAX));
        metrics::record_routing_duration(event, start.elapsed());
        delivered
    }
}
