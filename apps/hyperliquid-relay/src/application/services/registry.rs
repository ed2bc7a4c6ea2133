//! Subscription Registry
//!
//! Thread-safe owner of subscription membership. Every mutation and the
//! upstream requests it triggers happen under one lock, so concurrent
//! sessions can never cause a duplicate upstream subscribe or a lost
//! unsubscribe.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::application::ports::UpstreamPort;
use crate::domain::subscription::{
    Method, SessionId, Subscription, SubscriptionBook, SubscriptionChanges, SubscriptionStats,
    UpstreamRequest,
};

/// Point-in-time copy of the active subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySnapshot {
    /// Revision of the last request emitted before this snapshot.
    pub revision: u64,
    /// Subscriptions with a nonempty audience.
    pub subscriptions: Vec<Subscription>,
}

#[derive(Debug, Default)]
struct RegistryState {
    book: SubscriptionBook,
    revision: u64,
}

/// Session ↔ subscription registry wired to the upstream connection.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use hyperliquid_relay::application::ports::UpstreamPort;
/// use hyperliquid_relay::application::services::SubscriptionRegistry;
/// use hyperliquid_relay::domain::subscription::{SessionId, Subscription, UpstreamRequest};
///
/// struct Discard;
/// impl UpstreamPort for Discard {
///     fn request(&self, _request: UpstreamRequest) {}
/// }
///
/// let registry = SubscriptionRegistry::new(Arc::new(Discard));
/// let a = SessionId::new();
/// let b = SessionId::new();
/// let sol = Subscription::candle("SOL", "1h");
///
/// // First holder - upstream subscribe
/// assert!(registry.add_interest(a, sol.clone()));
/// // Second holder - shared
/// assert!(!registry.add_interest(b, sol.clone()));
/// // Last holder leaves - upstream unsubscribe
/// assert!(!registry.remove_interest(a, &sol));
/// assert!(registry.remove_interest(b, &sol));
/// ```
pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
    upstream: Arc<dyn UpstreamPort>,
}

impl SubscriptionRegistry {
    /// Create an empty registry that sends requests to `upstream`.
    #[must_use]
    pub fn new(upstream: Arc<dyn UpstreamPort>) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            upstream,
        }
    }

    /// Record that `session` wants `subscription`.
    ///
    /// Returns true if this triggered an upstream subscribe.
    pub fn add_interest(&self, session: SessionId, subscription: Subscription) -> bool {
        !self
            .add_interests(session, &[subscription])
            .subscribe
            .is_empty()
    }

    /// Record several subscriptions for one session as a unit.
    pub fn add_interests(
        &self,
        session: SessionId,
        subscriptions: &[Subscription],
    ) -> SubscriptionChanges {
        let mut state = self.state.lock();
        let added = state.book.add(session, subscriptions);
        let changes = SubscriptionChanges::subscribe_only(added);
        self.emit(&mut state, &changes);
        changes
    }

    /// Drop `session`'s interest in `subscription`.
    ///
    /// Returns true if this triggered an upstream unsubscribe.
    pub fn remove_interest(&self, session: SessionId, subscription: &Subscription) -> bool {
        !self
            .remove_interests(session, std::slice::from_ref(subscription))
            .unsubscribe
            .is_empty()
    }

    /// Drop several subscriptions for one session as a unit.
    pub fn remove_interests(
        &self,
        session: SessionId,
        subscriptions: &[Subscription],
    ) -> SubscriptionChanges {
        let mut state = self.state.lock();
        let removed = state.book.remove(session, subscriptions);
        let changes = SubscriptionChanges::unsubscribe_only(removed);
        self.emit(&mut state, &changes);
        changes
    }

    /// Point a session's account feed at `user`.
    ///
    /// Account subscriptions the session holds for any other address are
    /// released in the same step.
    pub fn switch_user(&self, session: SessionId, user: &str) -> SubscriptionChanges {
        let wanted = Subscription::user_data(user);
        let mut state = self.state.lock();
        let stale: Vec<_> = state
            .book
            .session_subscriptions(session)
            .into_iter()
            .filter(|s| s.user().is_some() && !wanted.contains(s))
            .collect();

        let changes = SubscriptionChanges {
            subscribe: state.book.add(session, &wanted),
            unsubscribe: state.book.remove(session, &stale),
        };
        self.emit(&mut state, &changes);
        changes
    }

    /// Release a session's account feed for `user`.
    ///
    /// Returns `None` if the session held neither subscription for that
    /// address.
    pub fn release_user(&self, session: SessionId, user: &str) -> Option<SubscriptionChanges> {
        let targets = Subscription::user_data(user);
        let mut state = self.state.lock();
        let owned = state.book.session_subscriptions(session);
        if !targets.iter().any(|s| owned.contains(s)) {
            return None;
        }

        let removed = state.book.remove(session, &targets);
        let changes = SubscriptionChanges::unsubscribe_only(removed);
        self.emit(&mut state, &changes);
        Some(changes)
    }

    /// Remove a session from every audience.
    pub fn remove_session(&self, session: SessionId) -> SubscriptionChanges {
        let mut state = self.state.lock();
        let removed = state.book.remove_session(session);
        let changes = SubscriptionChanges::unsubscribe_only(removed);
        self.emit(&mut state, &changes);
        changes
    }

    /// Sessions holding exactly this subscription.
    #[must_use]
    pub fn audience_for(&self, subscription: &Subscription) -> Vec<SessionId> {
        self.state.lock().book.audience(subscription)
    }

    /// Distinct user addresses with an active subscription on `channel`.
    #[must_use]
    pub fn users_on_channel(&self, channel: &str) -> Vec<String> {
        self.state.lock().book.users_on_channel(channel)
    }

    /// Subscriptions owned by a session.
    #[must_use]
    pub fn session_subscriptions(&self, session: SessionId) -> Vec<Subscription> {
        self.state.lock().book.session_subscriptions(session)
    }

    /// Active subscriptions plus the revision they reflect.
    #[must_use]
    pub fn snapshot(&self) -> RegistrySnapshot {
        let state = self.state.lock();
        RegistrySnapshot {
            revision: state.revision,
            subscriptions: state.book.active(),
        }
    }

    /// Get statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        self.state.lock().book.stats()
    }

    /// Enqueue one upstream request per change, still under the lock.
    fn emit(&self, state: &mut RegistryState, changes: &SubscriptionChanges) {
        for (method, subscription) in changes.requests() {
            state.revision += 1;
            tracing::debug!(
                method = method.as_str(),
                subscription = %subscription,
                revision = state.revision,
                "Upstream subscription change"
            );
            self.upstream.request(UpstreamRequest {
                revision: state.revision,
                method,
                subscription: subscription.clone(),
            });
        }
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
