#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Hyperliquid Relay - Market Data Multiplexer
//!
//! Holds one WebSocket connection to the Hyperliquid feed and fans its
//! messages out to many downstream WebSocket clients. Upstream
//! subscriptions are reference counted across clients: the first client
//! interested in a channel causes a subscribe, the last one leaving causes
//! an unsubscribe.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: protocol types and pure state
//!   - `subscription`: subscriptions, sessions and the membership book
//!   - `connection`: upstream connection state machine
//!   - `streaming`: client control messages, outbound events, upstream
//!     channel classification
//!
//! - **Application**: use cases and port definitions
//!   - `ports`: upstream request sink, broadcast sink, connector events
//!   - `services`: registry, session manager, router, relay task
//!
//! - **Infrastructure**: adapters and external integrations
//!   - `hyperliquid`: upstream connector, codec, reconnect, heartbeat
//!   - `websocket`: client `/ws` endpoint
//!   - `broadcast`: fan-out to session outboxes
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!                         requests (revisioned)
//!   SubscriptionRegistry ───────────────────────┐
//!          ▲                                    ▼
//!   SessionManager ◄── /ws clients       UpstreamConnector ◄──► Hyperliquid WS
//!          ▲                                    │
//!          │ outboxes                           │ events
//!     Broadcaster ◄── Relay (MessageRouter) ◄───┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Protocol types and pure state with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::{ConnectionState, ConnectionStateMachine};
pub use domain::streaming::{ClientProtocolError, ClientRequest, ServerMessage, UpstreamMessage};
pub use domain::subscription::{
    Audience, Method, SessionId, Subscription, SubscriptionChanges, SubscriptionStats,
    UpstreamRequest,
};

// Application services
pub use application::ports::{BroadcastPort, UpstreamEvent, UpstreamPort};
pub use application::services::{
    MessageRouter, Relay, SessionChannel, SessionManager, SubscriptionRegistry,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, Network, RelayConfig, ServerSettings, SessionSettings, UpstreamSettings,
};

// Upstream connector
pub use infrastructure::hyperliquid::{
    ConnectorError, UpstreamConnector, UpstreamConnectorConfig, UpstreamHandle, UpstreamStatus,
    upstream_channel,
};

// Servers
pub use infrastructure::broadcast::Broadcaster;
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::websocket::{RelayServer, RelayServerError};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
