//! Hyperliquid Upstream Integration
//!
//! WebSocket client for the Hyperliquid public feed.
//!
//! # Endpoints
//!
//! - Mainnet: `wss://api.hyperliquid.xyz/ws`
//! - Testnet: `wss://api.hyperliquid-testnet.xyz/ws`
//!
//! # Components
//!
//! - [`UpstreamConnector`]: connection lifecycle, replay and request forwarding
//! - [`JsonCodec`]: wire encoding
//! - [`ReconnectPolicy`]: delay between attempts
//! - [`HeartbeatManager`]: application-level ping and liveness
//! - [`UpstreamStatus`]: shared view for health reporting

pub mod codec;
pub mod connector;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;
pub mod status;

pub use codec::{JsonCodec, UpstreamProtocolError};
pub use connector::{
    ConnectorError, UpstreamConnector, UpstreamConnectorConfig, UpstreamHandle, upstream_channel,
};
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
pub use reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
pub use status::UpstreamStatus;
