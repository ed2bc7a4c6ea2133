//! Message Router
//!
//! Maps each classified upstream message to an outward event and the
//! audience that should receive it.
//!
//! | Upstream channel       | Event              | Audience                         |
//! |------------------------|--------------------|----------------------------------|
//! | `allMids`              | `price_update`     | every session                    |
//! | `webData2`             | `user_data_update` | holders of (`webData2`, user)    |
//! | `userEvents`           | `user_events`      | holders of (`userEvents`, user)  |
//! | `candle`               | `candle_update`    | holders of (`candle`, coin, ivl) |
//! | `subscriptionResponse` | (logged only)      |                                  |
//! | `pong`                 | (heartbeat only)   |                                  |
//! | anything else          | `upstream_message` | every session                    |

use std::sync::Arc;

use serde_json::Value;

use super::registry::SubscriptionRegistry;
use crate::domain::streaming::{ServerMessage, UpstreamMessage, candle_key, extract_user};
use crate::domain::subscription::{Audience, Subscription};

/// A message paired with its audience.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    /// Who should receive it.
    pub audience: Audience,
    /// What to send.
    pub message: ServerMessage,
}

/// Classifies upstream messages and resolves audiences from the registry.
#[derive(Debug)]
pub struct MessageRouter {
    registry: Arc<SubscriptionRegistry>,
}

impl MessageRouter {
    /// Create a router over `registry`.
    #[must_use]
    pub const fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self { registry }
    }

    /// Decide what to send and to whom.
    ///
    /// Returns `None` for messages that are not forwarded, or keyed messages
    /// nobody is subscribed to.
    #[must_use]
    pub fn route(&self, message: UpstreamMessage) -> Option<Route> {
        match message {
            UpstreamMessage::AllMids(data) => Some(Route {
                audience: Audience::Everyone,
                message: ServerMessage::PriceUpdate { data },
            }),
            UpstreamMessage::WebData2(data) => {
                let user = self.resolve_user(Subscription::WEB_DATA2, &data)?;
                self.keyed(
                    &Subscription::web_data2(&user),
                    ServerMessage::UserDataUpdate { data },
                )
            }
            UpstreamMessage::UserEvents(data) => {
                let user = self.resolve_user(Subscription::USER_EVENTS, &data)?;
                self.keyed(
                    &Subscription::user_events(&user),
                    ServerMessage::UserEvents { data },
                )
            }
            UpstreamMessage::Candle(data) => {
                let Some((coin, interval)) = candle_key(&data) else {
                    tracing::warn!("Candle without coin/interval dropped");
                    return None;
                };
                let subscription = Subscription::candle(coin, interval);
                self.keyed(&subscription, ServerMessage::CandleUpdate { data })
            }
            UpstreamMessage::SubscriptionResponse(data) => {
                tracing::info!(response = %data, "Upstream subscription response");
                None
            }
            UpstreamMessage::Pong => None,
            UpstreamMessage::Other { channel, data } => Some(Route {
                audience: Audience::Everyone,
                message: ServerMessage::UpstreamMessage { channel, data },
            }),
        }
    }

    /// Address from the payload, or the only subscribed address on the
    /// channel when the payload carries none.
    fn resolve_user(&self, channel: &str, data: &Value) -> Option<String> {
        if let Some(user) = extract_user(data) {
            return Some(user);
        }

        let mut users = self.registry.users_on_channel(channel);
        if users.len() == 1 {
            return users.pop();
        }

        tracing::warn!(
            channel,
            candidates = users.len(),
            "Could not determine user for account message"
        );
        None
    }

    fn keyed(&self, subscription: &Subscription, message: ServerMessage) -> Option<Route> {
        let sessions = self.registry.audience_for(subscription);
        if sessions.is_empty() {
            tracing::debug!(subscription = %subscription, "No sessions for keyed message");
            return None;
        }
        Some(Route {
            audience: Audience::Sessions(sessions),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MockUpstreamPort;
    use crate::domain::subscription::SessionId;
    use serde_json::json;

    fn router() -> (MessageRouter, Arc<SubscriptionRegistry>) {
        let mut upstream = MockUpstreamPort::new();
        upstream.expect_request().return_const(());
        let registry = Arc::new(SubscriptionRegistry::new(Arc::new(upstream)));
        (MessageRouter::new(Arc::clone(&registry)), registry)
    }

    #[test]
    fn all_mids_goes_to_everyone() {
        let (router, _) = router();
        let route = router
            .route(UpstreamMessage::AllMids(json!({"mids": {"SOL": "1"}})))
            .unwrap();

        assert_eq!(route.audience, Audience::Everyone);
        assert_eq!(route.message.event_name(), "price_update");
    }

    #[test]
    fn candle_goes_only_to_holders() {
        let (router, registry) = router();
        let a = SessionId::new();
        let b = SessionId::new();
        registry.add_interest(a, Subscription::candle("SOL", "1h"));
        registry.add_interest(b, Subscription::candle("SOL", "5m"));

        let route = router
            .route(UpstreamMessage::Candle(json!({"s": "SOL", "i": "1h", "c": "1"})))
            .unwrap();

        assert_eq!(route.audience, Audience::Sessions(vec![a]));
        assert_eq!(route.message.event_name(), "candle_update");
    }

    #[test]
    fn candle_without_holders_is_dropped() {
        let (router, _) = router();
        assert!(
            router
                .route(UpstreamMessage::Candle(json!({"s": "BTC", "i": "1h"})))
                .is_none()
        );
    }

    #[test]
    fn user_data_routes_by_embedded_address() {
        let (router, registry) = router();
        let a = SessionId::new();
        let b = SessionId::new();
        registry.add_interests(a, &Subscription::user_data("0xaa"));
        registry.add_interests(b, &Subscription::user_data("0xbb"));

        let route = router
            .route(UpstreamMessage::WebData2(json!({"user": "0xAA"})))
            .unwrap();

        assert_eq!(route.audience, Audience::Sessions(vec![a]));
        assert_eq!(route.message.event_name(), "user_data_update");
    }

    #[test]
    fn user_events_fall_back_to_single_subscriber() {
        let (router, registry) = router();
        let a = SessionId::new();
        registry.add_interests(a, &Subscription::user_data("0xaa"));

        let route = router
            .route(UpstreamMessage::UserEvents(json!({"funding": {"coin": "SOL"}})))
            .unwrap();

        assert_eq!(route.audience, Audience::Sessions(vec![a]));
        assert_eq!(route.message.event_name(), "user_events");
    }

    #[test]
    fn ambiguous_user_events_are_dropped() {
        let (router, registry) = router();
        registry.add_interests(SessionId::new(), &Subscription::user_data("0xaa"));
        registry.add_interests(SessionId::new(), &Subscription::user_data("0xbb"));

        assert!(
            router
                .route(UpstreamMessage::UserEvents(json!({"funding": {}})))
                .is_none()
        );
    }

    #[test]
    fn subscription_response_and_pong_are_not_forwarded() {
        let (router, _) = router();
        assert!(
            router
                .route(UpstreamMessage::SubscriptionResponse(json!({"method": "subscribe"})))
                .is_none()
        );
        assert!(router.route(UpstreamMessage::Pong).is_none());
    }

    #[test]
    fn unknown_channel_is_forwarded_verbatim() {
        let (router, _) = router();
        let route = router
            .route(UpstreamMessage::Other {
                channel: "trades".into(),
                data: json!([{"px": "1"}]),
            })
            .unwrap();

        assert_eq!(route.audience, Audience::Everyone);
        assert_eq!(
            route.message,
            ServerMessage::UpstreamMessage {
                channel: "trades".into(),
                data: json!([{"px": "1"}])
            }
        );
    }
}
