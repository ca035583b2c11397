//! WebSocket transport integration tests.
//!
//! Runs an in-process axum WebSocket server that checks the bearer token and
//! echoes chat messages back, and drives the engine through the real
//! `tokio-tungstenite` connector.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::get,
};
use chatsync_engine::{
    EngineConfig, EngineEvent, EngineHandle, WebSocketConnector,
    domain::{AuthToken, ConnectionStatus, RoomId, SyncError, UserId},
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};

const GOOD_TOKEN: &str = "let-me-in";

struct TestServer {
    addr: SocketAddr,
}

impl TestServer {
    async fn start() -> Self {
        let app = Router::new().route("/ws", get(ws_handler));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to read address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Server error");
        });
        Self { addr }
    }

    fn endpoint(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

async fn ws_handler(ws: WebSocketUpgrade, headers: HeaderMap) -> Response {
    let authorized = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {}", GOOD_TOKEN));
    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(handle_socket)
}

async fn handle_socket(socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let mut next_id = 0;

    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else {
            continue;
        };
        let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };

        let reply = match frame["type"].as_str() {
            Some("ping") => Some(json!({"type": "pong", "payload": {}, "timestamp": 0})),
            Some("message") => {
                next_id += 1;
                let mut payload = frame["payload"].clone();
                payload["id"] = json!(format!("srv-{}", next_id));
                Some(json!({
                    "type": "message",
                    "room_id": frame["room_id"],
                    "payload": payload,
                    "timestamp": frame["timestamp"],
                }))
            }
            Some("join") => Some(json!({
                "type": "joined",
                "room_id": frame["room_id"],
                "payload": {},
                "timestamp": 0
            })),
            _ => None,
        };

        if let Some(reply) = reply
            && sender
                .send(Message::Text(reply.to_string().into()))
                .await
                .is_err()
        {
            break;
        }
    }
}

fn spawn_engine(config: EngineConfig) -> EngineHandle {
    EngineHandle::spawn(
        config,
        UserId::try_from("alice").unwrap(),
        "Alice",
        Arc::new(WebSocketConnector::new()),
    )
}

#[tokio::test]
async fn test_send_and_confirm_over_websocket() {
    // テスト項目: 正しいトークンで接続し、送信したメッセージがサーバー ID で確定される
    // given (前提条件):
    let server = TestServer::start().await;
    let engine = spawn_engine(EngineConfig::default());
    let mut events = engine.subscribe().unwrap();
    let lobby = RoomId::try_from("lobby").unwrap();

    // when (操作):
    engine
        .connect(
            server.endpoint(),
            AuthToken::new(GOOD_TOKEN.to_string()).unwrap(),
        )
        .await
        .expect("Failed to connect");
    engine.join_room(lobby.clone()).unwrap();
    let sent = engine.send_message(&lobby, "hello over the wire").unwrap();

    let confirmed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(EngineEvent::MessageConfirmed { local_id, message }) = events.recv().await
            {
                return (local_id, message);
            }
        }
    })
    .await
    .expect("No confirmation received");

    // then (期待する結果):
    assert_eq!(engine.status(), ConnectionStatus::Connected);
    assert_eq!(confirmed.0, sent.id);
    assert_eq!(confirmed.1.id.as_str(), "srv-1");
    assert_eq!(confirmed.1.body.as_str(), "hello over the wire");

    engine.shutdown().await;
}

#[tokio::test]
async fn test_rejected_token_expires_session() {
    // テスト項目: サーバーが 401 を返すと AuthExpired で接続に失敗する
    // given (前提条件):
    let server = TestServer::start().await;
    let engine = spawn_engine(
        EngineConfig::default()
            .with_max_auth_failures(2)
            .with_backoff(Duration::from_millis(10), Duration::from_millis(50)),
    );

    // when (操作):
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        engine.connect(
            server.endpoint(),
            AuthToken::new("wrong".to_string()).unwrap(),
        ),
    )
    .await
    .expect("connect did not finish");

    // then (期待する結果):
    assert_eq!(result, Err(SyncError::AuthExpired));
    assert_eq!(engine.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_unreachable_endpoint_keeps_retrying_until_disconnect() {
    // テスト項目: 接続できないエンドポイントには再試行を続け、disconnect で connect が Disconnected になる
    // given (前提条件):
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let engine = spawn_engine(
        EngineConfig::default().with_backoff(Duration::from_millis(10), Duration::from_millis(50)),
    );
    let mut events = engine.subscribe().unwrap();

    // when (操作):
    let connecting = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .connect(
                    format!("ws://{}/ws", addr),
                    AuthToken::new(GOOD_TOKEN.to_string()).unwrap(),
                )
                .await
        })
    };
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(EngineEvent::ConnectionStateChanged(ConnectionStatus::Reconnecting)) =
                events.recv().await
            {
                break;
            }
        }
    })
    .await
    .expect("never started reconnecting");
    engine.disconnect().await.unwrap();
    let result = connecting.await.unwrap();

    // then (期待する結果):
    assert_eq!(result, Err(SyncError::Disconnected));
    assert_eq!(engine.status(), ConnectionStatus::Disconnected);
}
