//! Client control messages.
//!
//! Clients send tagged JSON objects:
//!
//! ```json
//! {"type": "subscribe_user_data", "payload": {"userAddress": "0x..."}}
//! {"type": "unsubscribe_user_data", "payload": {"userAddress": "0x..."}}
//! {"type": "subscribe_candles", "payload": {"coin": "SOL", "interval": "1h"}}
//! {"type": "unsubscribe", "payload": {"subscription": {"type": "candle", ...}}}
//! ```
//!
//! Parsing is done once at the boundary into [`ClientRequest`]; every way a
//! message can be wrong maps to a [`ClientProtocolError`] whose `Display`
//! text is what the client sees.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::domain::subscription::Subscription;

/// A validated client control request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    /// Receive `webData2` and `userEvents` for an address.
    SubscribeUserData {
        /// Lowercased user address.
        user_address: String,
    },
    /// Stop receiving `webData2` and `userEvents` for an address.
    UnsubscribeUserData {
        /// Lowercased user address.
        user_address: String,
    },
    /// Receive candles for a coin at an interval.
    SubscribeCandles {
        /// Coin symbol.
        coin: String,
        /// Candle interval.
        interval: String,
    },
    /// Drop one subscription.
    Unsubscribe {
        /// The subscription descriptor, normalized.
        subscription: Subscription,
    },
}

/// Errors reported back to the offending client only.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientProtocolError {
    /// Not parseable as a JSON object.
    #[error("Invalid JSON")]
    InvalidJson,

    /// No string `type` field.
    #[error("Message type required")]
    MissingType,

    /// Unrecognised `type` tag.
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    /// `userAddress` missing or empty.
    #[error("User address required")]
    UserAddressRequired,

    /// `coin` missing or empty.
    #[error("Coin required")]
    CoinRequired,

    /// `interval` missing or empty.
    #[error("Interval required")]
    IntervalRequired,

    /// `subscription` missing.
    #[error("Subscription required")]
    SubscriptionRequired,

    /// `subscription` present but not a known descriptor.
    #[error("Invalid subscription: {0}")]
    InvalidSubscription(String),
}

impl ClientProtocolError {
    /// Client-facing `{"error": "..."}` frame.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::json!({ "error": self.to_string() }).to_string()
    }
}

impl ClientRequest {
    /// Tag for subscribing to a user's account feed.
    pub const SUBSCRIBE_USER_DATA: &'static str = "subscribe_user_data";
    /// Tag for unsubscribing from a user's account feed.
    pub const UNSUBSCRIBE_USER_DATA: &'static str = "unsubscribe_user_data";
    /// Tag for subscribing to candles.
    pub const SUBSCRIBE_CANDLES: &'static str = "subscribe_candles";
    /// Tag for dropping a single subscription.
    pub const UNSUBSCRIBE: &'static str = "unsubscribe";

    /// Parse a raw text frame.
    ///
    /// # Errors
    ///
    /// Returns the [`ClientProtocolError`] to report to the client.
    pub fn parse(raw: &str) -> Result<Self, ClientProtocolError> {
        let Ok(Value::Object(mut message)) = serde_json::from_str::<Value>(raw) else {
            return Err(ClientProtocolError::InvalidJson);
        };

        let Some(Value::String(kind)) = message.remove("type") else {
            return Err(ClientProtocolError::MissingType);
        };
        let payload = message.remove("payload").unwrap_or(Value::Null);
        let payload = &payload;

        match kind.as_str() {
            Self::SUBSCRIBE_USER_DATA => Ok(Self::SubscribeUserData {
                user_address: required_str(payload, "userAddress")
                    .ok_or(ClientProtocolError::UserAddressRequired)?
                    .to_lowercase(),
            }),
            Self::UNSUBSCRIBE_USER_DATA => Ok(Self::UnsubscribeUserData {
                user_address: required_str(payload, "userAddress")
                    .ok_or(ClientProtocolError::UserAddressRequired)?
                    .to_lowercase(),
            }),
            Self::SUBSCRIBE_CANDLES => {
                let coin = required_str(payload, "coin").ok_or(ClientProtocolError::CoinRequired)?;
                let interval = required_str(payload, "interval")
                    .ok_or(ClientProtocolError::IntervalRequired)?;
                Ok(Self::SubscribeCandles {
                    coin: coin.to_owned(),
                    interval: interval.to_owned(),
                })
            }
            Self::UNSUBSCRIBE => {
                let descriptor = payload
                    .get("subscription")
                    .filter(|v| !v.is_null())
                    .ok_or(ClientProtocolError::SubscriptionRequired)?;
                let subscription = Subscription::deserialize(descriptor)
                    .map_err(|e| ClientProtocolError::InvalidSubscription(e.to_string()))?;
                Ok(Self::Unsubscribe {
                    subscription: subscription.normalized(),
                })
            }
            _ => Err(ClientProtocolError::UnknownType(kind)),
        }
    }
}

/// Non-empty, trimmed string field of the payload.
fn required_str<'a>(payload: &'a Value, field: &str) -> Option<&'a str> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
