//! Relay task: consumes upstream connector events in arrival order, routes
//! each message and hands it to the broadcaster.
//!
//! Running as a single task is what gives every session FIFO delivery with
//! respect to the upstream connection.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::router::MessageRouter;
use crate::application::ports::{BroadcastPort, UpstreamEvent};
use crate::domain::streaming::UpstreamMessage;

/// Routes upstream messages to client sessions.
pub struct Relay {
    router: MessageRouter,
    broadcaster: Arc<dyn BroadcastPort>,
}

impl Relay {
    /// Create a relay.
    #[must_use]
    pub fn new(router: MessageRouter, broadcaster: Arc<dyn BroadcastPort>) -> Self {
        Self {
            router,
            broadcaster,
        }
    }

    /// Route and deliver one message. Returns the number of sessions it was
    /// queued for.
    pub fn handle(&self, message: UpstreamMessage) -> usize {
        let channel = message.channel().to_owned();
        let Some(route) = self.router.route(message) else {
            return 0;
        };
        let delivered = self.broadcaster.broadcast(&route.audience, &route.message);
        tracing::trace!(
            channel = %channel,
            event = route.message.event_name(),
            delivered,
            "Routed upstream message"
        );
        delivered
    }

    /// Process connector events until the channel closes.
    pub async fn run(self, mut events: mpsc::Receiver<UpstreamEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                UpstreamEvent::Connected => {
                    tracing::info!("Upstream feed connected");
                }
                UpstreamEvent::Disconnected => {
                    tracing::warn!("Upstream feed disconnected");
                }
                UpstreamEvent::Reconnecting { attempt, delay } => {
                    tracing::info!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Upstream feed reconnecting"
                    );
                }
                UpstreamEvent::Message(message) => {
                    self.handle(message);
                }
                UpstreamEvent::Error(msg) => {
                    tracing::error!(error = %msg, "Upstream feed error");
                }
            }
        }
        tracing::info!("Relay stopped");
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}
