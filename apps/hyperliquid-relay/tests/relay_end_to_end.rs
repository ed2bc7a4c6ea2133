//! Relay End-to-End Tests
//!
//! Runs the full pipeline against an in-process fake Hyperliquid server:
//! client `/ws` sessions, registry, connector, router and broadcaster.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, accept_async, connect_async};
use tokio_util::sync::CancellationToken;

use hyperliquid_relay::infrastructure::hyperliquid::ReconnectConfig;
use hyperliquid_relay::{
    Broadcaster, MessageRouter, Relay, RelayServer, SessionManager, SubscriptionRegistry,
    UpstreamConnector, UpstreamConnectorConfig, UpstreamStatus, upstream_channel,
};

const WAIT: Duration = Duration::from_secs(5);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Fake Upstream
// =============================================================================

enum Command {
    Send(Value),
    Close,
}

struct FakeUpstream {
    url: String,
    connections: mpsc::UnboundedReceiver<mpsc::UnboundedSender<Command>>,
    received: mpsc::UnboundedReceiver<Value>,
}

impl FakeUpstream {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        let (conn_tx, connections) = mpsc::unbounded_channel();
        let (received_tx, received) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = accept_async(stream).await else {
                    continue;
                };
                let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
                if conn_tx.send(cmd_tx).is_err() {
                    return;
                }
                let received_tx = received_tx.clone();

                tokio::spawn(async move {
                    let (mut write, mut read) = ws.split();
                    loop {
                        tokio::select! {
                            cmd = cmd_rx.recv() => match cmd {
                                Some(Command::Send(value)) => {
                                    let text = value.to_string();
                                    if write.send(Message::Text(text.into())).await.is_err() {
                                        break;
                                    }
                                }
                                Some(Command::Close) | None => {
                                    let _ = write.close().await;
                                    break;
                                }
                            },
                            msg = read.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    let value: Value = serde_json::from_str(text.as_str()).unwrap();
                                    let _ = received_tx.send(value);
                                }
                                Some(Ok(_)) => {}
                                _ => break,
                            },
                        }
                    }
                });
            }
        });

        Self {
            url,
            connections,
            received,
        }
    }

    async fn accept(&mut self) -> mpsc::UnboundedSender<Command> {
        timeout(WAIT, self.connections.recv()).await.unwrap().unwrap()
    }

    async fn next_request(&mut self) -> Value {
        timeout(WAIT, self.received.recv()).await.unwrap().unwrap()
    }

    async fn requests(&mut self, n: usize) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for _ in 0..n {
            out.insert(self.next_request().await.to_string());
        }
        out
    }
}

fn subscribe(subscription: &Value) -> Value {
    json!({"method": "subscribe", "subscription": subscription})
}

fn unsubscribe(subscription: &Value) -> Value {
    json!({"method": "unsubscribe", "subscription": subscription})
}

// =============================================================================
// Relay Under Test
// =============================================================================

struct Harness {
    ws_url: String,
    sessions: Arc<SessionManager>,
    status: Arc<UpstreamStatus>,
    cancel: CancellationToken,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn start_relay(upstream_url: &str) -> Harness {
    let cancel = CancellationToken::new();

    let (handle, requests) = upstream_channel();
    let registry = Arc::new(SubscriptionRegistry::new(Arc::new(handle)));
    let sessions = Arc::new(SessionManager::new(Arc::clone(&registry), 64));

    let (event_tx, event_rx) = mpsc::channel(64);
    let relay = Relay::new(
        MessageRouter::new(Arc::clone(&registry)),
        Arc::new(Broadcaster::new(Arc::clone(&sessions))),
    );
    tokio::spawn(relay.run(event_rx));

    let mut config = UpstreamConnectorConfig::new(upstream_url);
    config.reconnect = ReconnectConfig::fixed(Duration::from_millis(50));
    let status = Arc::new(UpstreamStatus::new());
    let connector = UpstreamConnector::new(
        config,
        registry,
        requests,
        event_tx,
        Arc::clone(&status),
        cancel.clone(),
    );
    tokio::spawn(connector.run());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ws_url = format!("ws://{}/ws", listener.local_addr().unwrap());
    let server = RelayServer::new(
        "127.0.0.1".to_string(),
        0,
        Arc::clone(&sessions),
        cancel.clone(),
    );
    tokio::spawn(server.serve(listener));

    Harness {
        ws_url,
        sessions,
        status,
        cancel,
    }
}

async fn connect_client(url: &str) -> Client {
    let (mut client, _) = connect_async(url).await.unwrap();
    let hello = next_json(&mut client).await;
    assert_eq!(hello["type"], "connected");
    client
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let msg = timeout(WAIT, client.next()).await.unwrap().unwrap().unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn send_json(client: &mut Client, value: Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn all_mids_is_subscribed_on_connect() {
    let mut upstream = FakeUpstream::start().await;
    let relay = start_relay(&upstream.url).await;

    let _conn = upstream.accept().await;
    assert_eq!(
        upstream.next_request().await,
        subscribe(&json!({"type": "allMids"}))
    );

    timeout(WAIT, async {
        while !relay.status.is_connected() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn shared_candle_subscription_is_requested_once_and_routed_by_key() {
    let mut upstream = FakeUpstream::start().await;
    let relay = start_relay(&upstream.url).await;
    let conn = upstream.accept().await;
    upstream.next_request().await;

    let sol_1h = json!({"type": "candle", "coin": "SOL", "interval": "1h"});
    let sol_5m = json!({"type": "candle", "coin": "SOL", "interval": "5m"});

    let mut a = connect_client(&relay.ws_url).await;
    send_json(
        &mut a,
        json!({"type": "subscribe_candles", "payload": {"coin": "SOL", "interval": "1h"}}),
    )
    .await;
    let confirmed = next_json(&mut a).await;
    assert_eq!(confirmed["type"], "subscription_confirmed");
    assert_eq!(
        confirmed["data"],
        json!({"coin": "SOL", "interval": "1h", "subscription": "candle"})
    );
    assert_eq!(upstream.next_request().await, subscribe(&sol_1h));

    let mut b = connect_client(&relay.ws_url).await;
    send_json(
        &mut b,
        json!({"type": "subscribe_candles", "payload": {"coin": "SOL", "interval": "1h"}}),
    )
    .await;
    assert_eq!(next_json(&mut b).await["type"], "subscription_confirmed");

    let mut c = connect_client(&relay.ws_url).await;
    send_json(
        &mut c,
        json!({"type": "subscribe_candles", "payload": {"coin": "SOL", "interval": "5m"}}),
    )
    .await;
    assert_eq!(next_json(&mut c).await["type"], "subscription_confirmed");

    // The second 1h holder caused no upstream traffic.
    assert_eq!(upstream.next_request().await, subscribe(&sol_5m));

    conn.send(Command::Send(json!({
        "channel": "candle",
        "data": {"s": "SOL", "i": "1h", "c": "150.1"}
    })))
    .unwrap();
    conn.send(Command::Send(json!({
        "channel": "allMids",
        "data": {"mids": {"SOL": "150.2"}}
    })))
    .unwrap();

    for client in [&mut a, &mut b] {
        let candle = next_json(client).await;
        assert_eq!(candle["type"], "candle_update");
        assert_eq!(candle["data"]["c"], "150.1");
        assert_eq!(next_json(client).await["type"], "price_update");
    }
    assert_eq!(next_json(&mut c).await["type"], "price_update");

    assert_eq!(relay.sessions.len(), 3);
}

#[tokio::test]
async fn last_holder_leaving_unsubscribes_upstream() {
    let mut upstream = FakeUpstream::start().await;
    let relay = start_relay(&upstream.url).await;
    let _conn = upstream.accept().await;
    upstream.next_request().await;

    let mut a = connect_client(&relay.ws_url).await;
    send_json(
        &mut a,
        json!({"type": "subscribe_user_data", "payload": {"userAddress": "0xABC"}}),
    )
    .await;
    let confirmed = next_json(&mut a).await;
    assert_eq!(
        confirmed["data"],
        json!({"userAddress": "0xabc", "subscriptions": ["webData2", "userEvents"]})
    );

    let web_data = json!({"type": "webData2", "user": "0xabc"});
    let user_events = json!({"type": "userEvents", "user": "0xabc"});
    assert_eq!(
        upstream.requests(2).await,
        BTreeSet::from([subscribe(&web_data).to_string(), subscribe(&user_events).to_string()])
    );

    a.close(None).await.unwrap();

    assert_eq!(
        upstream.requests(2).await,
        BTreeSet::from([
            unsubscribe(&web_data).to_string(),
            unsubscribe(&user_events).to_string()
        ])
    );
}

#[tokio::test]
async fn subscriptions_are_replayed_after_reconnect() {
    let mut upstream = FakeUpstream::start().await;
    let relay = start_relay(&upstream.url).await;
    let first = upstream.accept().await;
    upstream.next_request().await;

    let mut a = connect_client(&relay.ws_url).await;
    send_json(
        &mut a,
        json!({"type": "subscribe_candles", "payload": {"coin": "ETH", "interval": "15m"}}),
    )
    .await;
    next_json(&mut a).await;
    let eth = json!({"type": "candle", "coin": "ETH", "interval": "15m"});
    assert_eq!(upstream.next_request().await, subscribe(&eth));

    first.send(Command::Close).unwrap();

    let second = upstream.accept().await;
    assert_eq!(
        upstream.requests(2).await,
        BTreeSet::from([
            subscribe(&json!({"type": "allMids"})).to_string(),
            subscribe(&eth).to_string()
        ])
    );

    second
        .send(Command::Send(json!({
            "channel": "candle",
            "data": {"s": "ETH", "i": "15m", "c": "3000"}
        })))
        .unwrap();
    let candle = next_json(&mut a).await;
    assert_eq!(candle["type"], "candle_update");
    assert_eq!(candle["data"]["s"], "ETH");
}

#[tokio::test]
async fn protocol_errors_go_to_the_sender_only() {
    let mut upstream = FakeUpstream::start().await;
    let relay = start_relay(&upstream.url).await;
    let conn = upstream.accept().await;
    upstream.next_request().await;

    let mut a = connect_client(&relay.ws_url).await;
    let mut b = connect_client(&relay.ws_url).await;

    send_json(&mut a, json!({"type": "bogus"})).await;
    assert_eq!(
        next_json(&mut a).await,
        json!({"error": "Unknown message type: bogus"})
    );

    send_json(&mut a, json!({"type": "subscribe_user_data", "payload": {}})).await;
    assert_eq!(
        next_json(&mut a).await,
        json!({"error": "User address required"})
    );

    a.send(Message::Text("not json".to_string().into())).await.unwrap();
    assert_eq!(next_json(&mut a).await, json!({"error": "Invalid JSON"}));

    conn.send(Command::Send(json!({
        "channel": "allMids",
        "data": {"mids": {"BTC": "97000"}}
    })))
    .unwrap();

    // b saw none of a's errors; its next frame is the broadcast.
    assert_eq!(next_json(&mut b).await["type"], "price_update");
    assert_eq!(next_json(&mut a).await["type"], "price_update");
}

#[tokio::test]
async fn unknown_upstream_channels_are_forwarded_verbatim() {
    let mut upstream = FakeUpstream::start().await;
    let relay = start_relay(&upstream.url).await;
    let conn = upstream.accept().await;
    upstream.next_request().await;

    let mut a = connect_client(&relay.ws_url).await;

    conn.send(Command::Send(json!({
        "channel": "subscriptionResponse",
        "data": {"method": "subscribe"}
    })))
    .unwrap();
    conn.send(Command::Send(json!({"channel": "pong"}))).unwrap();
    conn.send(Command::Send(json!({
        "channel": "notification",
        "data": {"notification": "maintenance"}
    })))
    .unwrap();

    assert_eq!(
        next_json(&mut a).await,
        json!({
            "type": "upstream_message",
            "channel": "notification",
            "data": {"notification": "maintenance"}
        })
    );
}
