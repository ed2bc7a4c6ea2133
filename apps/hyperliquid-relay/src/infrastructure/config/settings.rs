//! Relay Configuration Settings
//!
//! Configuration types for the relay, loaded from environment variables.

use std::time::Duration;

/// Hyperliquid network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Network {
    /// Testnet.
    #[default]
    Testnet,
    /// Mainnet.
    Mainnet,
}

impl Network {
    /// Parse network from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "mainnet" => Self::Mainnet,
            _ => Self::Testnet,
        }
    }

    /// Get the network name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Testnet => "testnet",
            Self::Mainnet => "mainnet",
        }
    }

    /// Public WebSocket endpoint for this network.
    #[must_use]
    pub const fn default_ws_url(&self) -> &'static str {
        match self {
            Self::Testnet => "wss://api.hyperliquid-testnet.xyz/ws",
            Self::Mainnet => "wss://api.hyperliquid.xyz/ws",
        }
    }
}

/// Upstream connection settings.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// WebSocket URL.
    pub url: String,
    /// Delay before the first reconnect attempt.
    pub reconnect_delay: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Delay multiplier per attempt (1.0 = fixed delay).
    pub reconnect_multiplier: f64,
    /// Jitter as a fraction of the delay.
    pub reconnect_jitter: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Application ping interval.
    pub heartbeat_interval: Duration,
    /// Silence tolerated after a ping.
    pub heartbeat_timeout: Duration,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            url: Network::default().default_ws_url().to_string(),
            reconnect_delay: Duration::from_millis(5000),
            reconnect_delay_max: Duration::from_secs(5),
            reconnect_multiplier: 1.0,
            reconnect_jitter: 0.0,
            max_reconnect_attempts: 0, // Unlimited
            heartbeat_interval: Duration::from_secs(50),
            heartbeat_timeout: Duration::from_secs(30),
        }
    }
}

/// Listener settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Bind address for both listeners.
    pub host: String,
    /// Client WebSocket port.
    pub port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
            health_port: 8082,
        }
    }
}

/// Queue sizes.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Per-session outbound queue depth.
    pub outbox_capacity: usize,
    /// Connector to relay event queue depth.
    pub event_buffer: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            outbox_capacity: 1024,
            event_buffer: 4096,
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    /// Hyperliquid network.
    pub network: Network,
    /// Upstream connection settings.
    pub upstream: UpstreamSettings,
    /// Listener settings.
    pub server: ServerSettings,
    /// Queue sizes.
    pub sessions: SessionSettings,
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `HYPERLIQUID_WS_URL` is set but unusable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if `HYPERLIQUID_WS_URL` is set but unusable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let network = lookup("HYPERLIQUID_NETWORK")
            .map(|s| Network::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let url = match lookup("HYPERLIQUID_WS_URL") {
            Some(url) => validate_ws_url("HYPERLIQUID_WS_URL", url)?,
            None => network.default_ws_url().to_string(),
        };

        let defaults = UpstreamSettings::default();
        let upstream = UpstreamSettings {
            url,
            reconnect_delay: parse_duration_millis(
                &lookup,
                "RELAY_RECONNECT_DELAY_MS",
                defaults.reconnect_delay,
            ),
            reconnect_delay_max: parse_duration_secs(
                &lookup,
                "RELAY_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max,
            ),
            reconnect_multiplier: parse(
                &lookup,
                "RELAY_RECONNECT_MULTIPLIER",
                defaults.reconnect_multiplier,
            ),
            reconnect_jitter: parse(&lookup, "RELAY_RECONNECT_JITTER", defaults.reconnect_jitter),
            max_reconnect_attempts: parse(
                &lookup,
                "RELAY_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            heartbeat_interval: parse_duration_secs(
                &lookup,
                "RELAY_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            ),
            heartbeat_timeout: parse_duration_secs(
                &lookup,
                "RELAY_HEARTBEAT_TIMEOUT_SECS",
                defaults.heartbeat_timeout,
            ),
        };

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            host: lookup("RELAY_HOST")
                .filter(|h| !h.trim().is_empty())
                .unwrap_or(server_defaults.host),
            port: parse(&lookup, "RELAY_PORT", server_defaults.port),
            health_port: parse(&lookup, "RELAY_HEALTH_PORT", server_defaults.health_port),
        };

        let session_defaults = SessionSettings::default();
        let sessions = SessionSettings {
            outbox_capacity: parse(&lookup, "RELAY_SESSION_BUFFER", session_defaults.outbox_capacity)
                .max(1),
            event_buffer: parse(&lookup, "RELAY_EVENT_BUFFER", session_defaults.event_buffer).max(1),
        };

        Ok(Self {
            network,
            upstream,
            server,
            sessions,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Value is not a WebSocket URL.
    #[error("environment variable {0} must be a ws:// or wss:// URL, got {1}")]
    InvalidUrl(String, String),
}

fn validate_ws_url(key: &str, url: String) -> Result<String, ConfigError> {
    let url = url.trim().to_string();
    if url.is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        return Err(ConfigError::InvalidUrl(key.to_string(), url));
    }
    Ok(url)
}

fn parse<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_duration_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
