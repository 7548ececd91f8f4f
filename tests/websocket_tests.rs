// End-to-end tests against a real server using a WebSocket client

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;
use transcription_relay::{create_router, AppState, BroadcastPolicy, Config};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Boot a server on an ephemeral port and return its WS URL + state
async fn boot_server(cfg: Config) -> (String, AppState) {
    let state = AppState::new(&cfg);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_router(state.clone());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("ws://{}/ws", addr), state)
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = timeout(TIMEOUT, connect_async(url))
        .await
        .expect("connect timed out")
        .expect("connect failed");
    ws
}

async fn wait_for_connections(state: &AppState, expected: usize) {
    let deadline = Instant::now() + TIMEOUT;
    while state.registry().len().await != expected {
        assert!(
            Instant::now() < deadline,
            "expected {} connections, have {}",
            expected,
            state.registry().len().await
        );
        sleep(Duration::from_millis(10)).await;
    }
}

/// Next JSON text frame, skipping control frames
async fn next_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("no frame before timeout")
            .expect("stream ended")
            .expect("read failed");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

/// Assert nothing but control frames arrive within a short window
async fn assert_silent(ws: &mut WsStream) {
    let window = timeout(Duration::from_millis(200), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                other => return other,
            }
        }
    })
    .await;
    assert!(window.is_err(), "unexpected frame: {:?}", window);
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

#[tokio::test]
async fn test_accuracy_metrics_reach_every_peer() {
    let (url, state) = boot_server(Config::default()).await;
    let mut peer1 = connect(&url).await;
    let mut peer2 = connect(&url).await;
    let mut peer3 = connect(&url).await;
    wait_for_connections(&state, 3).await;

    send_json(
        &mut peer1,
        json!({"type": "accuracy_metrics", "data": {"accuracy": 0.87}}),
    )
    .await;

    let mut stamps = Vec::new();
    for peer in [&mut peer2, &mut peer3] {
        let frame = next_json(peer).await;
        assert_eq!(frame["type"], "accuracy_metrics");
        assert_eq!(frame["data"], json!({"accuracy": 0.87}));
        stamps.push(frame["timestamp"].as_i64().unwrap());
        assert_silent(peer).await;
    }
    assert_eq!(stamps[0], stamps[1], "one stamp per broadcast");

    // Default policy echoes back to the sender
    let echoed = next_json(&mut peer1).await;
    assert_eq!(echoed["type"], "accuracy_metrics");
}

#[tokio::test]
async fn test_exclude_sender_policy() {
    let mut cfg = Config::default();
    cfg.websocket.broadcast_policy = BroadcastPolicy::ExcludeSender;
    let (url, state) = boot_server(cfg).await;
    let mut sender = connect(&url).await;
    let mut viewer = connect(&url).await;
    wait_for_connections(&state, 2).await;

    send_json(
        &mut sender,
        json!({"type": "latency_metrics", "data": {"latency": 120}}),
    )
    .await;

    let frame = next_json(&mut viewer).await;
    assert_eq!(frame["data"]["latency"], 120);
    assert_silent(&mut sender).await;
}

#[tokio::test]
async fn test_disconnect_deregisters_peer() {
    let (url, state) = boot_server(Config::default()).await;
    let mut peer1 = connect(&url).await;
    let mut peer2 = connect(&url).await;
    let mut peer3 = connect(&url).await;
    wait_for_connections(&state, 3).await;

    peer2.close(None).await.unwrap();
    wait_for_connections(&state, 2).await;

    send_json(
        &mut peer1,
        json!({"type": "transcription_result", "data": {"text": "still here", "confidence": 0.8, "latency": 60}}),
    )
    .await;

    let frame = next_json(&mut peer3).await;
    assert_eq!(frame["data"]["text"], "still here");
    assert_eq!(state.registry().len().await, 2);
}

#[tokio::test]
async fn test_malformed_frame_keeps_connections_open() {
    let (url, state) = boot_server(Config::default()).await;
    let mut peer_a = connect(&url).await;
    let mut peer_b = connect(&url).await;
    wait_for_connections(&state, 2).await;

    peer_a
        .send(Message::text("this is not json"))
        .await
        .unwrap();
    send_json(&mut peer_a, json!({"type": "mystery", "data": {}})).await;
    assert_silent(&mut peer_b).await;
    assert_eq!(state.registry().len().await, 2);

    send_json(
        &mut peer_b,
        json!({"type": "latency_metrics", "data": {"latency": 33}}),
    )
    .await;
    assert_eq!(next_json(&mut peer_a).await["data"]["latency"], 33);
    assert_eq!(next_json(&mut peer_b).await["data"]["latency"], 33);
}

#[tokio::test]
async fn test_malformed_notice_when_enabled() {
    let mut cfg = Config::default();
    cfg.websocket.notify_malformed = true;
    let (url, state) = boot_server(cfg).await;
    let mut peer_a = connect(&url).await;
    let mut peer_b = connect(&url).await;
    wait_for_connections(&state, 2).await;

    send_json(&mut peer_a, json!({"type": "latency_metrics"})).await;

    let notice = next_json(&mut peer_a).await;
    assert_eq!(notice["type"], "error");
    assert_eq!(notice["data"]["reason"], "missing `data`");
    assert_silent(&mut peer_b).await;
}

#[tokio::test]
async fn test_simulated_transcription_reaches_socket_peers() {
    let (url, state) = boot_server(Config::default()).await;
    let mut viewer = connect(&url).await;
    wait_for_connections(&state, 1).await;

    // Same state as the socket server, so the broadcast reaches `viewer`
    let request = Request::builder()
        .method("POST")
        .uri("/api/simulate-transcription")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({"text": "hi", "confidence": 0.9, "latency": 80}).to_string(),
        ))
        .unwrap();
    let response = create_router(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let frame = next_json(&mut viewer).await;
    assert_eq!(frame["type"], "transcription_result");
    assert_eq!(frame["data"]["text"], "hi");
    assert_silent(&mut viewer).await;
}

#[tokio::test]
async fn test_client_close_completes_handshake() {
    let (url, state) = boot_server(Config::default()).await;
    let mut peer = connect(&url).await;
    wait_for_connections(&state, 1).await;

    peer.close(None).await.unwrap();

    // The server answers with its own close frame instead of dropping TCP
    let reply = timeout(TIMEOUT, peer.next())
        .await
        .expect("close reply before timeout");
    assert!(
        matches!(reply, Some(Ok(Message::Close(_)))),
        "expected close reply, got {:?}",
        reply
    );
    wait_for_connections(&state, 0).await;
}

#[tokio::test]
async fn test_root_path_also_upgrades() {
    let (url, state) = boot_server(Config::default()).await;
    let root = url.trim_end_matches("/ws").to_string() + "/";
    let _peer = connect(&root).await;
    wait_for_connections(&state, 1).await;
}

#[tokio::test]
async fn test_silent_peer_is_dropped_by_heartbeat() {
    let mut cfg = Config::default();
    cfg.websocket.heartbeat_interval_ms = 100;
    let (url, state) = boot_server(cfg).await;

    // Never read, so the client never answers pings
    let _silent = connect(&url).await;
    wait_for_connections(&state, 1).await;
    wait_for_connections(&state, 0).await;
}

#[tokio::test]
async fn test_shutdown_closes_sessions() {
    let (url, state) = boot_server(Config::default()).await;
    let mut peer = connect(&url).await;
    wait_for_connections(&state, 1).await;

    state.shutdown();

    let msg = timeout(TIMEOUT, peer.next())
        .await
        .expect("close frame before timeout")
        .expect("stream ended")
        .expect("read failed");
    match msg {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Away),
        other => panic!("expected close frame, got {:?}", other),
    }
    wait_for_connections(&state, 0).await;
}
