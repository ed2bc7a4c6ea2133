//! Subscription Management Types
//!
//! Domain types for tracking which client sessions want which upstream
//! channels.
//!
//! # Design
//!
//! The subscription book tracks:
//! - Which sessions hold each distinct upstream subscription (its audience)
//! - Which subscriptions each session owns
//!
//! Both directions are updated together so they never disagree. Every
//! mutation reports the subscriptions whose audience crossed the 0↔1
//! boundary, which are exactly the ones that must be requested or
//! withdrawn upstream. Many sessions can share one upstream subscription.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Types
// =============================================================================

/// Opaque identity of a downstream client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh random session id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A distinct upstream subscription, identified by channel type and
/// parameters.
///
/// Serializes to the exchange's subscription descriptor, e.g.
/// `{"type":"candle","coin":"SOL","interval":"1h"}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Subscription {
    /// Mid prices for every coin.
    AllMids,
    /// Aggregated account state for a user.
    WebData2 {
        /// Lowercased user address.
        user: String,
    },
    /// Fills, funding and liquidation events for a user.
    UserEvents {
        /// Lowercased user address.
        user: String,
    },
    /// Candles for a coin at a given interval.
    Candle {
        /// Coin symbol, e.g. `SOL`.
        coin: String,
        /// Candle interval, e.g. `1h`.
        interval: String,
    },
}

impl Subscription {
    /// Upstream channel tag for `webData2`.
    pub const WEB_DATA2: &'static str = "webData2";
    /// Upstream channel tag for `userEvents`.
    pub const USER_EVENTS: &'static str = "userEvents";
    /// Upstream channel tag for `allMids`.
    pub const ALL_MIDS: &'static str = "allMids";
    /// Upstream channel tag for `candle`.
    pub const CANDLE: &'static str = "candle";

    /// `webData2` subscription for a user (address is lowercased).
    #[must_use]
    pub fn web_data2(user: &str) -> Self {
        Self::WebData2 {
            user: user.to_lowercase(),
        }
    }

    /// `userEvents` subscription for a user (address is lowercased).
    #[must_use]
    pub fn user_events(user: &str) -> Self {
        Self::UserEvents {
            user: user.to_lowercase(),
        }
    }

    /// `candle` subscription for a coin and interval.
    #[must_use]
    pub fn candle(coin: impl Into<String>, interval: impl Into<String>) -> Self {
        Self::Candle {
            coin: coin.into(),
            interval: interval.into(),
        }
    }

    /// The pair of keyed subscriptions that make up a user's account feed,
    /// in the order they are requested upstream.
    #[must_use]
    pub fn user_data(user: &str) -> [Self; 2] {
        [Self::user_events(user), Self::web_data2(user)]
    }

    /// Return the same subscription keyed the way control messages key it:
    /// fields trimmed, user addresses lowercased.
    #[must_use]
    pub fn normalized(self) -> Self {
        match self {
            Self::WebData2 { user } => Self::web_data2(user.trim()),
            Self::UserEvents { user } => Self::user_events(user.trim()),
            Self::Candle { coin, interval } => Self::candle(coin.trim(), interval.trim()),
            Self::AllMids => Self::AllMids,
        }
    }

    /// Upstream channel tag this subscription produces.
    #[must_use]
    pub const fn channel(&self) -> &'static str {
        match self {
            Self::AllMids => Self::ALL_MIDS,
            Self::WebData2 { .. } => Self::WEB_DATA2,
            Self::UserEvents { .. } => Self::USER_EVENTS,
            Self::Candle { .. } => Self::CANDLE,
        }
    }

    /// User address for keyed account subscriptions.
    #[must_use]
    pub fn user(&self) -> Option<&str> {
        match self {
            Self::WebData2 { user } | Self::UserEvents { user } => Some(user.as_str()),
            Self::AllMids | Self::Candle { .. } => None,
        }
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllMids => f.write_str(Self::ALL_MIDS),
            Self::WebData2 { user } | Self::UserEvents { user } => {
                write!(f, "{}:{user}", self.channel())
            }
            Self::Candle { coin, interval } => write!(f, "candle:{coin}:{interval}"),
        }
    }
}

/// Upstream request verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Start receiving a channel.
    Subscribe,
    /// Stop receiving a channel.
    Unsubscribe,
}

impl Method {
    /// Get the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// A subscribe/unsubscribe request destined for the upstream feed.
///
/// `revision` orders requests against registry snapshots: a request is
/// already reflected in any snapshot whose revision is at least as large.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamRequest {
    /// Registry revision that produced this request.
    pub revision: u64,
    /// Subscribe or unsubscribe.
    pub method: Method,
    /// Target subscription.
    pub subscription: Subscription,
}

/// The set of sessions a message is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Every connected session.
    Everyone,
    /// Only these sessions.
    Sessions(Vec<SessionId>),
}

impl Audience {
    /// Check whether the audience is known to be empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Everyone => false,
            Self::Sessions(ids) => ids.is_empty(),
        }
    }
}

// =============================================================================
// Subscription Changes
// =============================================================================

/// Changes to upstream subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Subscriptions to request upstream.
    pub subscribe: Vec<Subscription>,
    /// Subscriptions to withdraw upstream.
    pub unsubscribe: Vec<Subscription>,
}

impl SubscriptionChanges {
    /// Check if there are any changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }

    /// Create changes with only subscribes.
    #[must_use]
    pub fn subscribe_only(subscriptions: impl IntoIterator<Item = Subscription>) -> Self {
        Self {
            subscribe: subscriptions.into_iter().collect(),
            unsubscribe: Vec::new(),
        }
    }

    /// Create changes with only unsubscribes.
    #[must_use]
    pub fn unsubscribe_only(subscriptions: impl IntoIterator<Item = Subscription>) -> Self {
        Self {
            subscribe: Vec::new(),
            unsubscribe: subscriptions.into_iter().collect(),
        }
    }

    /// Iterate over the changes as upstream verbs.
    pub fn requests(&self) -> impl Iterator<Item = (Method, &Subscription)> {
        self.subscribe
            .iter()
            .map(|s| (Method::Subscribe, s))
            .chain(self.unsubscribe.iter().map(|s| (Method::Unsubscribe, s)))
    }
}

// =============================================================================
// Subscription Book
// =============================================================================

/// Bidirectional session ↔ subscription membership.
///
/// Not thread-safe on its own; the registry service wraps it in a lock.
#[derive(Debug, Default)]
pub struct SubscriptionBook {
    /// Subscription → sessions holding it. Never holds an empty set.
    audiences: BTreeMap<Subscription, BTreeSet<SessionId>>,
    /// Session → subscriptions it owns. Never holds an empty set.
    sessions: HashMap<SessionId, BTreeSet<Subscription>>,
}

impl SubscriptionBook {
    /// Create an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add subscriptions for a session.
    ///
    /// Returns subscriptions whose audience went 0→1.
    pub fn add(&mut self, session: SessionId, subscriptions: &[Subscription]) -> Vec<Subscription> {
        let owned = self.sessions.entry(session).or_default();
        let mut new_upstream = Vec::new();

        for subscription in subscriptions {
            // Skip if session already holds it
            if !owned.insert(subscription.clone()) {
                continue;
            }

            let audience = self.audiences.entry(subscription.clone()).or_default();
            audience.insert(session);

            // First holder - needs upstream subscribe
            if audience.len() == 1 {
                new_upstream.push(subscription.clone());
            }
        }

        if owned.is_empty() {
            self.sessions.remove(&session);
        }

        new_upstream
    }

    /// Remove subscriptions for a session.
    ///
    /// Returns subscriptions whose audience went 1→0.
    pub fn remove(
        &mut self,
        session: SessionId,
        subscriptions: &[Subscription],
    ) -> Vec<Subscription> {
        let Some(owned) = self.sessions.get_mut(&session) else {
            return vec![];
        };

        let mut remove_upstream = Vec::new();

        for subscription in subscriptions {
            // Skip if session wasn't holding it
            if !owned.remove(subscription) {
                continue;
            }

            if Self::detach(&mut self.audiences, subscription, session) {
                remove_upstream.push(subscription.clone());
            }
        }

        if owned.is_empty() {
            self.sessions.remove(&session);
        }

        remove_upstream
    }

    /// Remove every subscription held by a session.
    ///
    /// Returns subscriptions whose audience went 1→0.
    pub fn remove_session(&mut self, session: SessionId) -> Vec<Subscription> {
        let Some(owned) = self.sessions.remove(&session) else {
            return vec![];
        };

        owned
            .into_iter()
            .filter(|subscription| Self::detach(&mut self.audiences, subscription, session))
            .collect()
    }

    /// Drop `session` from one audience. Returns true if it became empty.
    fn detach(
        audiences: &mut BTreeMap<Subscription, BTreeSet<SessionId>>,
        subscription: &Subscription,
        session: SessionId,
    ) -> bool {
        let Some(audience) = audiences.get_mut(subscription) else {
            return false;
        };
        audience.remove(&session);
        if audience.is_empty() {
            audiences.remove(subscription);
            return true;
        }
        false
    }

    /// Sessions holding exactly this subscription.
    #[must_use]
    pub fn audience(&self, subscription: &Subscription) -> Vec<SessionId> {
        self.audiences
            .get(subscription)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Every subscription with a nonempty audience, in stable order.
    #[must_use]
    pub fn active(&self) -> Vec<Subscription> {
        self.audiences.keys().cloned().collect()
    }

    /// Subscriptions owned by a session.
    #[must_use]
    pub fn session_subscriptions(&self, session: SessionId) -> Vec<Subscription> {
        self.sessions
            .get(&session)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Distinct user addresses with an active subscription on `channel`.
    #[must_use]
    pub fn users_on_channel(&self, channel: &str) -> Vec<String> {
        self.audiences
            .keys()
            .filter(|s| s.channel() == channel)
            .filter_map(|s| s.user().map(str::to_owned))
            .collect()
    }

    /// Get statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        SubscriptionStats {
            subscription_count: self.audiences.len(),
            session_count: self.sessions.len(),
        }
    }

    /// Check that both directions of the mapping agree.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let forward = self.audiences.iter().all(|(subscription, ids)| {
            !ids.is_empty()
                && ids.iter().all(|id| {
                    self.sessions
                        .get(id)
                        .is_some_and(|owned| owned.contains(subscription))
                })
        });
        let backward = self.sessions.iter().all(|(id, owned)| {
            !owned.is_empty()
                && owned.iter().all(|subscription| {
                    self.audiences
                        .get(subscription)
                        .is_some_and(|ids| ids.contains(id))
                })
        });
        forward && backward
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Subscription statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionStats {
    /// Number of distinct upstream subscriptions with a nonempty audience.
    pub subscription_count: usize,
    /// Number of sessions holding at least one subscription.
    pub session_count: usize,
}

// =============================================================================
// Tests
// =============================================================================
