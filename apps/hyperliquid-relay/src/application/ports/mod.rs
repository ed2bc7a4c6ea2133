//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`UpstreamPort`]: enqueue subscribe/unsubscribe requests for the
//!   upstream connection
//! - [`BroadcastPort`]: deliver an event to an audience of sessions
//!
//! ## Driver Events (Inbound)
//!
//! - [`UpstreamEvent`]: what the upstream connector reports to the relay

use std::time::Duration;

use crate::domain::streaming::{ServerMessage, UpstreamMessage};
use crate::domain::subscription::{Audience, UpstreamRequest};

/// Sink for upstream subscription requests.
///
/// Implementations must not block: the registry calls this while holding
/// its lock so request order matches mutation order.
#[cfg_attr(test, mockall::automock)]
pub trait UpstreamPort: Send + Sync {
    /// Enqueue a request for the upstream connection.
    fn request(&self, request: UpstreamRequest);
}

/// Fan-out delivery to client sessions.
#[cfg_attr(test, mockall::automock)]
pub trait BroadcastPort: Send + Sync {
    /// Deliver `message` to every session in `audience`.
    ///
    /// Returns the number of sessions the message was queued for.
    fn broadcast(&self, audience: &Audience, message: &ServerMessage) -> usize;
}

/// Events emitted by the upstream connector.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    /// Socket opened and subscriptions replayed.
    Connected,
    /// Socket lost.
    Disconnected,
    /// A reconnect is scheduled.
    Reconnecting {
        /// Attempt number, starting at 1.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// A classified upstream message.
    Message(UpstreamMessage),
    /// Non-fatal error description.
    Error(String),
}
