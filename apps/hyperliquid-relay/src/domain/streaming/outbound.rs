//! Relay → client messages.

use serde::Serialize;
use serde_json::Value;

use crate::domain::subscription::Subscription;

/// Greeting sent to every new session.
pub const CONNECTED_MESSAGE: &str = "Connected to HyperSwipe WebSocket server";

/// Messages pushed to downstream clients.
///
/// Serialized with a `type` tag, e.g.
/// `{"type":"price_update","data":{...}}`. Error replies are not part of
/// this enum; see [`ClientProtocolError`](super::ClientProtocolError).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection acknowledgement.
    Connected {
        /// Human readable greeting.
        message: String,
    },
    /// A subscribe request took effect.
    SubscriptionConfirmed {
        /// What was subscribed.
        data: Confirmation,
    },
    /// An unsubscribe request took effect.
    UnsubscriptionConfirmed {
        /// What was unsubscribed.
        data: Confirmation,
    },
    /// `allMids` payload.
    PriceUpdate {
        /// Upstream payload, untouched.
        data: Value,
    },
    /// `webData2` payload.
    UserDataUpdate {
        /// Upstream payload, untouched.
        data: Value,
    },
    /// `userEvents` payload.
    UserEvents {
        /// Upstream payload, untouched.
        data: Value,
    },
    /// `candle` payload.
    CandleUpdate {
        /// Upstream payload, untouched.
        data: Value,
    },
    /// Any other upstream channel, forwarded verbatim.
    UpstreamMessage {
        /// Original upstream channel tag.
        channel: String,
        /// Upstream payload, untouched.
        data: Value,
    },
}

impl ServerMessage {
    /// Connection acknowledgement with the standard greeting.
    #[must_use]
    pub fn connected() -> Self {
        Self::Connected {
            message: CONNECTED_MESSAGE.to_string(),
        }
    }

    /// Outward event name, used as a metrics label.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::SubscriptionConfirmed { .. } => "subscription_confirmed",
            Self::UnsubscriptionConfirmed { .. } => "unsubscription_confirmed",
            Self::PriceUpdate { .. } => "price_update",
            Self::UserDataUpdate { .. } => "user_data_update",
            Self::UserEvents { .. } => "user_events",
            Self::CandleUpdate { .. } => "candle_update",
            Self::UpstreamMessage { .. } => "upstream_message",
        }
    }
}

/// Body of a (un)subscription confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Confirmation {
    /// `subscribe_user_data` took effect.
    #[serde(rename_all = "camelCase")]
    UserData {
        /// Lowercased address.
        user_address: String,
        /// Channels now streaming for the address.
        subscriptions: Vec<String>,
    },
    /// `unsubscribe_user_data` took effect.
    #[serde(rename_all = "camelCase")]
    UserDataRemoved {
        /// Lowercased address.
        user_address: String,
        /// Channels no longer streaming for the address.
        unsubscribed: Vec<String>,
    },
    /// `subscribe_candles` took effect.
    Candles {
        /// Coin symbol.
        coin: String,
        /// Candle interval.
        interval: String,
        /// Always `candle`.
        subscription: String,
    },
    /// `unsubscribe` took effect.
    Subscription {
        /// The descriptor that was dropped.
        subscription: Subscription,
    },
}

impl Confirmation {
    /// Confirmation for a user data subscription.
    #[must_use]
    pub fn user_data(user_address: &str) -> Self {
        Self::UserData {
            user_address: user_address.to_string(),
            subscriptions: user_data_channels(),
        }
    }

    /// Confirmation for a user data unsubscription.
    #[must_use]
    pub fn user_data_removed(user_address: &str) -> Self {
        Self::UserDataRemoved {
            user_address: user_address.to_string(),
            unsubscribed: user_data_channels(),
        }
    }

    /// Confirmation for a candle subscription.
    #[must_use]
    pub fn candles(coin: &str, interval: &str) -> Self {
        Self::Candles {
            coin: coin.to_string(),
            interval: interval.to_string(),
            subscription: Subscription::CANDLE.to_string(),
        }
    }
}

fn user_data_channels() -> Vec<String> {
    vec![
        Subscription::WEB_DATA2.to_string(),
        Subscription::USER_EVENTS.to_string(),
    ]
}
