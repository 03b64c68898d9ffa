//! End-to-end tests driving a real server over WebSocket.

use futures_util::{SinkExt, StreamExt};
use parley_protocol::{codec, ClientEvent, ServerEvent};
use parley_server::{handlers, Config};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

fn test_config() -> Config {
    let mut config = Config::default();
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.metrics.enabled = false;
    config
}

/// Start a server on a random port.
async fn start_server(config: Config) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        handlers::serve(listener, config).await.unwrap();
    });

    addr
}

/// Connect and consume the `connected` handshake.
async fn connect(addr: SocketAddr) -> WsStream {
    let (mut ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    let handshake = next_event(&mut ws).await;
    assert_eq!(handshake["event"], "connected");
    assert_eq!(handshake["data"]["version"], "1.0");
    ws
}

async fn emit(ws: &mut WsStream, event: Value) {
    ws.send(Message::Text(event.to_string())).await.unwrap();
}

async fn login(ws: &mut WsStream, username: &str) {
    emit(ws, json!({"event": "login", "data": {"username": username}})).await;
}

/// Read the next JSON event, skipping control frames.
async fn next_event(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("websocket error");

        match msg {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

/// Read the next MessagePack event, skipping control frames.
async fn next_binary_event(ws: &mut WsStream) -> ServerEvent {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("websocket error");

        match msg {
            Message::Binary(data) => return codec::decode(&data).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

/// Assert that no event arrives for a short while.
async fn assert_quiet(ws: &mut WsStream) {
    loop {
        match timeout(QUIET, ws.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
            Ok(other) => panic!("expected no event, got {:?}", other),
        }
    }
}

fn presence(names: &[&str]) -> Value {
    json!({"event": "login-acknowledge", "data": names})
}

#[tokio::test]
async fn test_two_client_scenario() {
    let addr = start_server(test_config()).await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;

    login(&mut a, "alice").await;
    assert_eq!(next_event(&mut a).await, presence(&["alice"]));
    assert_eq!(next_event(&mut b).await, presence(&["alice"]));

    login(&mut b, "bob").await;
    assert_eq!(next_event(&mut a).await, presence(&["alice", "bob"]));
    assert_eq!(next_event(&mut b).await, presence(&["alice", "bob"]));

    let group = json!({"event": "group-message", "data": {"message": "hi", "from": "alice"}});
    emit(&mut a, group.clone()).await;
    assert_eq!(next_event(&mut a).await, group);
    assert_eq!(next_event(&mut b).await, group);

    let private = json!({
        "event": "private-message",
        "data": {"message": "hey", "from": "alice", "to": "bob"}
    });
    emit(&mut a, private.clone()).await;
    assert_eq!(next_event(&mut b).await, private);
    assert_quiet(&mut a).await;

    b.close(None).await.unwrap();
    assert_eq!(next_event(&mut a).await, presence(&["alice"]));
}

#[tokio::test]
async fn test_payloads_relayed_unmodified() {
    let addr = start_server(test_config()).await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;

    login(&mut a, "alice").await;
    for ws in [&mut a, &mut b] {
        assert_eq!(next_event(ws).await, presence(&["alice"]));
    }
    login(&mut b, "bob").await;
    for ws in [&mut a, &mut b] {
        assert_eq!(next_event(ws).await, presence(&["alice", "bob"]));
    }

    let group = json!({
        "event": "group-message",
        "data": {"message": "hi", "from": "alice", "timestamp": 123, "meta": {"room": "lobby"}}
    });
    emit(&mut a, group.clone()).await;
    assert_eq!(next_event(&mut a).await, group);
    assert_eq!(next_event(&mut b).await, group);

    let private = json!({
        "event": "private-message",
        "data": {"message": "hey", "from": "alice", "to": "bob", "id": "m-7", "attachments": []}
    });
    emit(&mut a, private.clone()).await;
    assert_eq!(next_event(&mut b).await, private);
}

#[tokio::test]
async fn test_anonymous_connection_is_ignored() {
    let addr = start_server(test_config()).await;
    let mut a = connect(addr).await;
    let mut anon = connect(addr).await;

    login(&mut a, "alice").await;
    assert_eq!(next_event(&mut a).await, presence(&["alice"]));
    assert_eq!(next_event(&mut anon).await, presence(&["alice"]));

    emit(
        &mut anon,
        json!({"event": "group-message", "data": {"message": "spoof", "from": "alice"}}),
    )
    .await;
    emit(
        &mut anon,
        json!({"event": "private-message", "data": {"message": "spoof", "from": "x", "to": "alice"}}),
    )
    .await;
    assert_quiet(&mut a).await;
    assert_quiet(&mut anon).await;

    anon.close(None).await.unwrap();
    assert_quiet(&mut a).await;
}

#[tokio::test]
async fn test_private_message_to_unknown_name() {
    let addr = start_server(test_config()).await;
    let mut a = connect(addr).await;

    login(&mut a, "alice").await;
    assert_eq!(next_event(&mut a).await, presence(&["alice"]));

    emit(
        &mut a,
        json!({"event": "private-message", "data": {"message": "hey", "from": "alice", "to": "ghost"}}),
    )
    .await;
    assert_quiet(&mut a).await;

    // The connection is still usable.
    let group = json!({"event": "group-message", "data": {"message": "still here", "from": "alice"}});
    emit(&mut a, group.clone()).await;
    assert_eq!(next_event(&mut a).await, group);
}

#[tokio::test]
async fn test_relogin_takes_over_name() {
    let addr = start_server(test_config()).await;
    let mut a = connect(addr).await;
    let mut old = connect(addr).await;
    let mut new = connect(addr).await;

    login(&mut a, "alice").await;
    for ws in [&mut a, &mut old, &mut new] {
        assert_eq!(next_event(ws).await, presence(&["alice"]));
    }

    login(&mut old, "bob").await;
    for ws in [&mut a, &mut old, &mut new] {
        assert_eq!(next_event(ws).await, presence(&["alice", "bob"]));
    }

    login(&mut new, "bob").await;
    for ws in [&mut a, &mut old, &mut new] {
        assert_eq!(next_event(ws).await, presence(&["alice", "bob"]));
    }

    let private = json!({
        "event": "private-message",
        "data": {"message": "hey", "from": "alice", "to": "bob"}
    });
    emit(&mut a, private.clone()).await;
    assert_eq!(next_event(&mut new).await, private);
    assert_quiet(&mut old).await;

    // The displaced connection leaving does not change presence.
    old.close(None).await.unwrap();
    assert_quiet(&mut a).await;
}

#[tokio::test]
async fn test_malformed_frames_are_ignored() {
    let addr = start_server(test_config()).await;
    let mut a = connect(addr).await;

    a.send(Message::Text("not json".to_string())).await.unwrap();
    emit(&mut a, json!({"event": "logout", "data": {}})).await;
    emit(&mut a, json!({"event": "login", "data": {}})).await;
    assert_quiet(&mut a).await;

    login(&mut a, "alice").await;
    assert_eq!(next_event(&mut a).await, presence(&["alice"]));
}

#[tokio::test]
async fn test_msgpack_connection() {
    let addr = start_server(test_config()).await;
    let mut json_client = connect(addr).await;

    let (mut ws, _) = connect_async(format!("ws://{}/ws?format=msgpack", addr))
        .await
        .unwrap();
    assert!(matches!(
        next_binary_event(&mut ws).await,
        ServerEvent::Connected(_)
    ));

    let frame = codec::encode(&ClientEvent::login("mia")).unwrap();
    ws.send(Message::Binary(frame.to_vec())).await.unwrap();

    assert_eq!(
        next_binary_event(&mut ws).await,
        ServerEvent::LoginAcknowledge(vec!["mia".to_string()])
    );

    // JSON clients see the same presence list.
    assert_eq!(next_event(&mut json_client).await, presence(&["mia"]));
}

#[tokio::test]
async fn test_connection_limit() {
    let mut config = test_config();
    config.limits.max_connections = 1;
    let addr = start_server(config).await;

    let _a = connect(addr).await;
    assert!(connect_async(format!("ws://{}/ws", addr)).await.is_err());
}

#[tokio::test]
async fn test_silent_connection_times_out() {
    let mut config = test_config();
    config.heartbeat.interval_ms = 50;
    config.heartbeat.timeout_ms = 200;
    let addr = start_server(config).await;

    let mut silent = connect(addr).await;
    let mut watcher = connect(addr).await;

    login(&mut silent, "sleepy").await;
    assert_eq!(next_event(&mut watcher).await, presence(&["sleepy"]));

    // `silent` never reads again, so it never answers pings.
    assert_eq!(next_event(&mut watcher).await, presence(&[]));
    drop(silent);
}
