//! Hyperliquid Relay Binary
//!
//! Starts the relay.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin hyperliquid-relay
//! ```
//!
//! # Environment Variables
//!
//! - `HYPERLIQUID_NETWORK`: testnet | mainnet (default: testnet)
//! - `HYPERLIQUID_WS_URL`: Upstream URL override
//! - `RELAY_HOST`: Bind address (default: 0.0.0.0)
//! - `RELAY_PORT`: Client WebSocket port (default: 8081)
//! - `RELAY_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `RELAY_RECONNECT_DELAY_MS`: Reconnect delay (default: 5000)
//! - `RELAY_HEARTBEAT_INTERVAL_SECS`: Upstream ping interval (default: 50)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use hyperliquid_relay::infrastructure::telemetry;
use hyperliquid_relay::{
    Broadcaster, HealthServer, HealthServerState, MessageRouter, Relay, RelayConfig, RelayServer,
    SessionManager, SubscriptionRegistry, UpstreamConnector, UpstreamConnectorConfig,
    UpstreamStatus, init_metrics, upstream_channel,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    load_dotenv();

    let _telemetry_guard = telemetry::init()?;

    tracing::info!("Starting Hyperliquid relay");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = RelayConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Registry → connector request queue
    let (upstream_handle, requests_rx) = upstream_channel();
    let registry = Arc::new(SubscriptionRegistry::new(Arc::new(upstream_handle)));
    let sessions = Arc::new(SessionManager::new(
        Arc::clone(&registry),
        config.sessions.outbox_capacity,
    ));

    // Connector → relay event queue
    let (event_tx, event_rx) = mpsc::channel(config.sessions.event_buffer);
    let relay = Relay::new(
        MessageRouter::new(Arc::clone(&registry)),
        Arc::new(Broadcaster::new(Arc::clone(&sessions))),
    );
    let relay_handle = tokio::spawn(relay.run(event_rx));

    let upstream_status = Arc::new(UpstreamStatus::new());
    let connector = UpstreamConnector::new(
        UpstreamConnectorConfig::from_settings(&config.upstream),
        Arc::clone(&registry),
        requests_rx,
        event_tx,
        Arc::clone(&upstream_status),
        shutdown_token.clone(),
    );
    let connector_handle = tokio::spawn(async move {
        if let Err(e) = connector.run().await {
            tracing::error!(error = %e, "Upstream connector stopped");
        }
    });

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        config.network,
        config.upstream.url.clone(),
        config.server.port,
        Arc::clone(&upstream_status),
        Arc::clone(&sessions),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let relay_server = RelayServer::new(
        config.server.host.clone(),
        config.server.port,
        Arc::clone(&sessions),
        shutdown_token.clone(),
    );
    let server_token = shutdown_token.clone();
    tokio::spawn(async move {
        if let Err(e) = relay_server.run().await {
            tracing::error!(error = %e, "Relay server error");
            server_token.cancel();
        }
    });

    tracing::info!("Relay ready");

    await_shutdown(shutdown_token).await;
    drain(connector_handle, relay_handle).await;

    tracing::info!("Relay stopped");
    Ok(())
}

/// Wait for the connector to close upstream and the relay to drain.
async fn drain(connector: JoinHandle<()>, relay: JoinHandle<()>) {
    let joined = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = connector.await;
        let _ = relay.await;
    })
    .await;

    if joined.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out"
        );
    }
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        network = config.network.as_str(),
        upstream_url = %config.upstream.url,
        host = %config.server.host,
        port = config.server.port,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        reconnect_delay_ms = u64::try_from(config.upstream.reconnect_delay.as_millis()).unwrap_or(u64::MAX),
        max_reconnect_attempts = config.upstream.max_reconnect_attempts,
        heartbeat_interval_secs = config.upstream.heartbeat_interval.as_secs(),
        outbox_capacity = config.sessions.outbox_capacity,
        event_buffer = config.sessions.event_buffer,
        "Relay tuning"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT), or for a server to fail.
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::warn!("Server failure, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
