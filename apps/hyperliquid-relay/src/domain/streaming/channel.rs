//! Classified upstream channel messages.
//!
//! The exchange pushes `{"channel": <tag>, "data": <payload>}`. Each known
//! tag becomes its own variant; anything else is kept as
//! [`UpstreamMessage::Other`] so it can be forwarded untouched.

use serde_json::Value;

use crate::domain::subscription::Subscription;

/// Channel tag for subscription acknowledgements.
pub const SUBSCRIPTION_RESPONSE: &str = "subscriptionResponse";

/// Channel tag for heartbeat replies.
pub const PONG: &str = "pong";

/// An inbound upstream message, classified by channel tag.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamMessage {
    /// Mid prices for every coin.
    AllMids(Value),
    /// Account state for one user.
    WebData2(Value),
    /// Account events for one user.
    UserEvents(Value),
    /// A candle update.
    Candle(Value),
    /// Acknowledgement of a subscribe/unsubscribe request.
    SubscriptionResponse(Value),
    /// Heartbeat reply.
    Pong,
    /// Any other channel.
    Other {
        /// Original tag.
        channel: String,
        /// Original payload.
        data: Value,
    },
}

impl UpstreamMessage {
    /// Classify a channel/payload pair.
    #[must_use]
    pub fn classify(channel: String, data: Value) -> Self {
        match channel.as_str() {
            Subscription::ALL_MIDS => Self::AllMids(data),
            Subscription::WEB_DATA2 => Self::WebData2(data),
            Subscription::USER_EVENTS => Self::UserEvents(data),
            Subscription::CANDLE => Self::Candle(data),
            SUBSCRIPTION_RESPONSE => Self::SubscriptionResponse(data),
            PONG => Self::Pong,
            _ => Self::Other { channel, data },
        }
    }

    /// The upstream channel tag.
    #[must_use]
    pub fn channel(&self) -> &str {
        match self {
            Self::AllMids(_) => Subscription::ALL_MIDS,
            Self::WebData2(_) => Subscription::WEB_DATA2,
            Self::UserEvents(_) => Subscription::USER_EVENTS,
            Self::Candle(_) => Subscription::CANDLE,
            Self::SubscriptionResponse(_) => SUBSCRIPTION_RESPONSE,
            Self::Pong => PONG,
            Self::Other { channel, .. } => channel.as_str(),
        }
    }
}

/// Recover the user address an account payload belongs to.
///
/// Looks at `user`, `userAddress`, the nested `clearinghouseState`, then the
/// first fill. The result is lowercased.
#[must_use]
pub fn extract_user(data: &Value) -> Option<String> {
    address_field(data)
        .or_else(|| data.get("clearinghouseState").and_then(address_field))
        .or_else(|| {
            data.get("fills")
                .and_then(|fills| fills.get(0))
                .and_then(address_field)
        })
        .map(str::to_lowercase)
}

fn address_field(value: &Value) -> Option<&str> {
    ["user", "userAddress"]
        .iter()
        .find_map(|key| value.get(key).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

/// Coin and interval of a candle payload (`s` and `i` fields).
#[must_use]
pub fn candle_key(data: &Value) -> Option<(&str, &str)> {
    let coin = data.get("s").and_then(Value::as_str)?;
    let interval = data.get("i").and_then(Value::as_str)?;
    Some((coin, interval))
}
