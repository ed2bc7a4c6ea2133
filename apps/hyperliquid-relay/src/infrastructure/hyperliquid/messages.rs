//! Hyperliquid WebSocket Wire Types
//!
//! Outbound requests and the inbound channel envelope.
//!
//! ```json
//! {"method": "subscribe", "subscription": {"type": "allMids"}}
//! {"method": "ping"}
//! {"channel": "allMids", "data": {"mids": {"BTC": "97000.5"}}}
//! ```
//!
//! # References
//!
//! - <https://hyperliquid.gitbook.io/hyperliquid-docs/for-developers/api/websocket>

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::subscription::{Method, Subscription};

/// Subscribe or unsubscribe request.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionRequest<'a> {
    /// `subscribe` or `unsubscribe`.
    pub method: Method,
    /// Channel descriptor.
    pub subscription: &'a Subscription,
}

/// Application-level heartbeat request.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PingRequest {
    /// Always `ping`.
    pub method: &'static str,
}

impl Default for PingRequest {
    fn default() -> Self {
        Self { method: "ping" }
    }
}

/// Every inbound frame.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelEnvelope {
    /// Channel tag.
    pub channel: String,
    /// Channel payload; absent for `pong`.
    #[serde(default)]
    pub data: Value,
}
