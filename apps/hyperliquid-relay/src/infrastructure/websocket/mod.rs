//! Client WebSocket Endpoint
//!
//! Accepts downstream connections on `/ws`. Each connection becomes one
//! session in the [`SessionManager`]:
//!
//! - a writer task drains the session outbox into the socket and sends
//!   keepalive pings
//! - the reader loop hands text frames to `on_message` and answers pings
//! - when either side ends, `on_disconnect` releases the session's
//!   subscriptions and stops the writer

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::services::{SessionChannel, SessionManager};
use crate::domain::subscription::SessionId;
use crate::infrastructure::metrics;

/// Interval between keepalive pings to each client.
pub const CLIENT_PING_INTERVAL: Duration = Duration::from_secs(30);

// =============================================================================
// Server
// =============================================================================

#[derive(Debug)]
struct WsState {
    sessions: Arc<SessionManager>,
    shutdown: CancellationToken,
}

/// Downstream WebSocket server.
#[derive(Debug)]
pub struct RelayServer {
    host: String,
    port: u16,
    sessions: Arc<SessionManager>,
    cancel: CancellationToken,
}

impl RelayServer {
    /// Create a new relay server.
    #[must_use]
    pub const fn new(
        host: String,
        port: u16,
        sessions: Arc<SessionManager>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            host,
            port,
            sessions,
            cancel,
        }
    }

    /// Bind and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `RelayServerError` if binding fails or the server stops
    /// with an error.
    pub async fn run(self) -> Result<(), RelayServerError> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| RelayServerError::BindFailed(addr.clone(), e.to_string()))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `RelayServerError` if the server stops with an error.
    pub async fn serve(self, listener: TcpListener) -> Result<(), RelayServerError> {
        let local = listener
            .local_addr()
            .map_or_else(|_| format!("{}:{}", self.host, self.port), |a| a.to_string());
        tracing::info!(addr = %local, "Relay WebSocket server listening");

        let app = router(self.sessions, self.cancel.clone());
        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| RelayServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Relay WebSocket server stopped");
        Ok(())
    }
}

/// Build the `/ws` router.
pub fn router(sessions: Arc<SessionManager>, shutdown: CancellationToken) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(Arc::new(WsState { sessions, shutdown }))
}

// =============================================================================
// Connection Handling
// =============================================================================

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<WsState>>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<WsState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let SessionChannel {
        id,
        mut outbox,
        closed,
    } = state.sessions.on_connect();
    metrics::set_sessions(state.sessions.len());

    // Pongs owed to the client, written by the writer task.
    let (control_tx, mut control_rx) = mpsc::channel::<Message>(8);

    let writer_closed = closed.clone();
    let writer = tokio::spawn(async move {
        let start = tokio::time::Instant::now() + CLIENT_PING_INTERVAL;
        let mut ping = tokio::time::interval_at(start, CLIENT_PING_INTERVAL);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                () = writer_closed.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
                frame = outbox.recv() => {
                    let Some(frame) = frame else { break };
                    if ws_tx.send(Message::Text(frame.to_string().into())).await.is_err() {
                        break;
                    }
                }
                Some(control) = control_rx.recv() => {
                    if ws_tx.send(control).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    loop {
        tokio::select! {
            () = closed.cancelled() => break,
            () = state.shutdown.cancelled() => break,
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_text(&state, id, text.as_str());
                    }
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => handle_text(&state, id, text),
                        Err(_) => tracing::debug!(session_id = %id, "Ignoring non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = control_tx.try_send(Message::Pong(data));
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(session_id = %id, error = %e, "Client socket error");
                        break;
                    }
                }
            }
        }
    }

    state.sessions.on_disconnect(id);
    metrics::set_sessions(state.sessions.len());
    let _ = writer.await;
}

fn handle_text(state: &WsState, id: SessionId, text: &str) {
    if let Err(e) = state.sessions.on_message(id, text) {
        tracing::debug!(session_id = %id, error = %e, "Rejected client message");
        metrics::record_client_error();
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Relay server errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayServerError {
    /// Failed to bind the listener.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(String, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
