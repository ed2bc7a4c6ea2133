//! JSON codec for the Hyperliquid feed.

use super::messages::{ChannelEnvelope, PingRequest, SubscriptionRequest};
use crate::domain::streaming::UpstreamMessage;
use crate::domain::subscription::{Method, Subscription};

/// An upstream frame that could not be understood.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamProtocolError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encodes requests and decodes channel frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame into a classified message.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a `{"channel": ..}` object.
    pub fn decode(self, text: &str) -> Result<UpstreamMessage, UpstreamProtocolError> {
        let envelope: ChannelEnvelope = serde_json::from_str(text)?;
        Ok(UpstreamMessage::classify(envelope.channel, envelope.data))
    }

    /// Encode a subscribe/unsubscribe request.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode_request(
        self,
        method: Method,
        subscription: &Subscription,
    ) -> Result<String, UpstreamProtocolError> {
        Ok(serde_json::to_string(&SubscriptionRequest {
            method,
            subscription,
        })?)
    }

    /// Encode a heartbeat ping.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode_ping(self) -> Result<String, UpstreamProtocolError> {
        Ok(serde_json::to_string(&PingRequest::default())?)
    }
}
