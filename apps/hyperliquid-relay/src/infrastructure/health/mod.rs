//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, connection status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (upstream connected)
//! - `GET /status` - Service identity and configuration summary
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::SessionManager;
use crate::domain::connection::ConnectionState;
use crate::domain::subscription::SubscriptionStats;
use crate::infrastructure::config::Network;
use crate::infrastructure::hyperliquid::UpstreamStatus;
use crate::infrastructure::metrics::get_metrics_handle;

/// Service name reported by `/status`.
pub const SERVICE_NAME: &str = "hyperliquid-relay";

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Relay version.
    pub version: String,
    /// Hyperliquid network.
    pub network: &'static str,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream connection status.
    pub upstream: UpstreamInfo,
    /// Connected client sessions.
    pub sessions: usize,
    /// Registry statistics.
    pub subscriptions: SubscriptionStats,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Upstream connected.
    Healthy,
    /// Upstream connecting.
    Degraded,
    /// Upstream down.
    Unhealthy,
}

impl From<ConnectionState> for HealthStatus {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Connected => Self::Healthy,
            ConnectionState::Connecting => Self::Degraded,
            ConnectionState::Disconnected => Self::Unhealthy,
        }
    }
}

/// Upstream connection status.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamInfo {
    /// Connection state.
    pub state: ConnectionState,
    /// Whether the feed is connected.
    pub connected: bool,
    /// Messages received count.
    pub messages_received: u64,
    /// Current reconnect attempts (0 if connected).
    pub reconnect_attempts: u32,
    /// Subscriptions active upstream.
    pub subscriptions: usize,
    /// When the feed last connected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Most recent error since the last connect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// `/status` response.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    /// Service name.
    pub service: &'static str,
    /// Relay version.
    pub version: String,
    /// Hyperliquid network.
    pub network: &'static str,
    /// Upstream WebSocket URL.
    pub upstream_url: String,
    /// Client WebSocket port.
    pub relay_port: u16,
    /// Always "operational" while the process serves requests.
    pub status: &'static str,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
#[derive(Debug)]
pub struct HealthServerState {
    version: String,
    network: Network,
    upstream_url: String,
    relay_port: u16,
    started_at: Instant,
    upstream: Arc<UpstreamStatus>,
    sessions: Arc<SessionManager>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        network: Network,
        upstream_url: String,
        relay_port: u16,
        upstream: Arc<UpstreamStatus>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            version,
            network,
            upstream_url,
            relay_port,
            started_at: Instant::now(),
            upstream,
            sessions,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Build the health router.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.upstream.is_connected() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn status_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    Json(StatusResponse {
        service: SERVICE_NAME,
        version: state.version.clone(),
        network: state.network.as_str(),
        upstream_url: state.upstream_url.clone(),
        relay_port: state.relay_port,
        status: "operational",
    })
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let upstream = upstream_info(&state.upstream);

    HealthResponse {
        status: HealthStatus::from(upstream.state),
        version: state.version.clone(),
        network: state.network.as_str(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        upstream,
        sessions: state.sessions.len(),
        subscriptions: state.sessions.registry().stats(),
    }
}

fn upstream_info(status: &UpstreamStatus) -> UpstreamInfo {
    let state = status.state();

    UpstreamInfo {
        state,
        connected: state == ConnectionState::Connected,
        messages_received: status.messages_received(),
        reconnect_attempts: status.reconnect_attempts(),
        subscriptions: status.subscription_count(),
        last_connected_at: status.last_connected_at(),
        last_error: status.last_error(),
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MockUpstreamPort;
    use crate::application::services::SubscriptionRegistry;
    use crate::domain::subscription::Subscription;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn state() -> (Arc<HealthServerState>, Arc<UpstreamStatus>, Arc<SessionManager>) {
        let mut upstream = MockUpstreamPort::new();
        upstream.expect_request().return_const(());
        let registry = Arc::new(SubscriptionRegistry::new(Arc::new(upstream)));
        let sessions = Arc::new(SessionManager::new(registry, 8));
        let status = Arc::new(UpstreamStatus::new());
        let state = Arc::new(HealthServerState::new(
            "0.1.0".to_string(),
            Network::Testnet,
            Network::Testnet.default_ws_url().to_string(),
            8081,
            Arc::clone(&status),
            Arc::clone(&sessions),
        ));
        (state, status, sessions)
    }

    async fn get(state: Arc<HealthServerState>, uri: &str) -> (StatusCode, String) {
        let response = router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn status_follows_connection_state() {
        assert_eq!(HealthStatus::from(ConnectionState::Connected), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from(ConnectionState::Connecting), HealthStatus::Degraded);
        assert_eq!(
            HealthStatus::from(ConnectionState::Disconnected),
            HealthStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn health_is_unavailable_while_disconnected() {
        let (state, _, _) = state();
        let (code, body) = get(state, "/health").await;

        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["network"], "testnet");
        assert_eq!(json["upstream"]["state"], "disconnected");
    }

    #[tokio::test]
    async fn health_reports_sessions_and_subscriptions() {
        let (state, status, sessions) = state();
        status.set_state(ConnectionState::Connected);
        let session = sessions.on_connect();
        sessions
            .registry()
            .add_interest(session.id, Subscription::candle("SOL", "1h"));

        let (code, body) = get(state, "/health").await;

        assert_eq!(code, StatusCode::OK);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["upstream"]["connected"], true);
        assert_eq!(json["sessions"], 1);
        assert_eq!(json["subscriptions"]["subscription_count"], 1);
    }

    #[tokio::test]
    async fn readiness_tracks_upstream() {
        let (state, status, _) = state();
        assert_eq!(
            get(Arc::clone(&state), "/readyz").await,
            (StatusCode::SERVICE_UNAVAILABLE, "NOT READY".to_string())
        );

        status.set_state(ConnectionState::Connected);
        assert_eq!(
            get(state, "/readyz").await,
            (StatusCode::OK, "READY".to_string())
        );
    }

    #[tokio::test]
    async fn liveness_and_status() {
        let (state, _, _) = state();
        assert_eq!(
            get(Arc::clone(&state), "/healthz").await,
            (StatusCode::OK, "OK".to_string())
        );

        let (code, body) = get(state, "/status").await;
        assert_eq!(code, StatusCode::OK);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["service"], "hyperliquid-relay");
        assert_eq!(json["relay_port"], 8081);
        assert_eq!(json["status"], "operational");
    }
}
