//! Test fixtures for the engine integration tests.
//!
//! `FakeServer` plays the messaging endpoint in memory: it records every
//! frame per connection, answers pings, echoes chat messages back with a
//! server id, and lets a test break or drop the current connection.

#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use chatsync_engine::{
    EngineConfig, EngineEvent, EngineHandle,
    domain::{AuthToken, Connector, Link, RoomId, TransportError, UserId},
};
use serde_json::{Value, json};
use tokio::sync::mpsc;

pub const ENDPOINT: &str = "ws://fake.chat/ws";

#[derive(Default)]
struct ServerState {
    connections: Vec<FakeConnection>,
    reject_auth: bool,
    echo: bool,
    next_id: u64,
    tokens: Vec<String>,
}

struct FakeConnection {
    frames: Vec<Value>,
    inbound: Option<mpsc::UnboundedSender<String>>,
    alive: bool,
}

#[derive(Clone)]
pub struct FakeServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ServerState {
                echo: true,
                ..Default::default()
            })),
        }
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(FakeConnector {
            state: Arc::clone(&self.state),
        })
    }

    /// Refuse every following handshake with an auth error.
    pub fn reject_auth(&self, reject: bool) {
        self.state.lock().unwrap().reject_auth = reject;
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().unwrap().connections.len()
    }

    /// Tokens presented on every handshake, in order.
    pub fn tokens(&self) -> Vec<String> {
        self.state.lock().unwrap().tokens.clone()
    }

    /// Frames received on one connection.
    pub fn frames(&self, connection: usize) -> Vec<Value> {
        self.state.lock().unwrap().connections[connection]
            .frames
            .clone()
    }

    /// Frames of one type received over all connections.
    pub fn frames_of_type(&self, frame_type: &str) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .connections
            .iter()
            .flat_map(|c| c.frames.iter())
            .filter(|f| f["type"] == frame_type)
            .cloned()
            .collect()
    }

    /// Break the latest connection silently: writes fail, reads hang.
    pub fn sever(&self) {
        if let Some(connection) = self.state.lock().unwrap().connections.last_mut() {
            connection.alive = false;
        }
    }

    /// Close the latest connection from the server side.
    pub fn drop_connection(&self) {
        if let Some(connection) = self.state.lock().unwrap().connections.last_mut() {
            connection.alive = false;
            connection.inbound = None;
        }
    }

    /// Deliver a frame on the latest connection.
    pub fn push(&self, frame: Value) {
        self.push_raw(&frame.to_string());
    }

    pub fn push_raw(&self, text: &str) {
        let state = self.state.lock().unwrap();
        let inbound = state
            .connections
            .last()
            .and_then(|c| c.inbound.as_ref())
            .expect("no open connection");
        inbound.send(text.to_string()).expect("engine side closed");
    }
}

struct FakeConnector {
    state: Arc<Mutex<ServerState>>,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        _endpoint: &str,
        token: &AuthToken,
    ) -> Result<Box<dyn Link>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.tokens.push(token.expose().to_string());
        if state.reject_auth {
            return Err(TransportError::AuthRejected);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.connections.push(FakeConnection {
            frames: Vec::new(),
            inbound: Some(tx),
            alive: true,
        });
        Ok(Box::new(FakeLink {
            index: state.connections.len() - 1,
            state: Arc::clone(&self.state),
            inbound: rx,
        }))
    }
}

struct FakeLink {
    index: usize,
    state: Arc<Mutex<ServerState>>,
    inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl Link for FakeLink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        let echo = state.echo;
        state.next_id += 1;
        let server_id = format!("srv-{}", state.next_id);

        let connection = &mut state.connections[self.index];
        if !connection.alive {
            return Err(TransportError::Send("connection reset".to_string()));
        }
        let frame: Value = serde_json::from_str(&text).expect("engine sent invalid JSON");
        connection.frames.push(frame.clone());

        let reply = match frame["type"].as_str() {
            Some("ping") => Some(json!({"type": "pong", "payload": {}, "timestamp": 0})),
            Some("message") if echo => {
                let mut payload = frame["payload"].clone();
                payload["id"] = json!(server_id);
                Some(json!({
                    "type": "message",
                    "room_id": frame["room_id"],
                    "payload": payload,
                    "timestamp": frame["timestamp"],
                }))
            }
            _ => None,
        };
        if let (Some(reply), Some(inbound)) = (reply, connection.inbound.as_ref()) {
            let _ = inbound.send(reply.to_string());
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        let mut state = self.state.lock().unwrap();
        let connection = &mut state.connections[self.index];
        connection.alive = false;
        connection.inbound = None;
    }
}

pub fn user(id: &str) -> UserId {
    UserId::try_from(id).unwrap()
}

pub fn room(id: &str) -> RoomId {
    RoomId::try_from(id).unwrap()
}

pub fn token(secret: &str) -> AuthToken {
    AuthToken::new(secret.to_string()).unwrap()
}

/// Config with a short backoff so reconnects happen quickly.
pub fn test_config() -> EngineConfig {
    EngineConfig::default().with_backoff(Duration::from_millis(100), Duration::from_secs(2))
}

/// Engine for "alice" talking to `server`, with an event subscription.
pub fn spawn_alice(
    server: &FakeServer,
    config: EngineConfig,
) -> (EngineHandle, mpsc::UnboundedReceiver<EngineEvent>) {
    let engine = EngineHandle::spawn(config, user("alice"), "Alice", server.connector());
    let events = engine.subscribe().unwrap();
    (engine, events)
}

/// Frame of a chat message from a remote user.
pub fn remote_message(id: &str, room_id: &str, sender: &str, body: &str, sent_at: i64) -> Value {
    json!({
        "type": "message",
        "room_id": room_id,
        "payload": {
            "id": id,
            "sender_id": sender,
            "sender_name": capitalize(sender),
            "body": body,
            "sent_at": sent_at
        },
        "timestamp": sent_at
    })
}

pub fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Wait for the first event matching `pred`, skipping the others.
pub async fn next_event<F>(events: &mut mpsc::UnboundedReceiver<EngineEvent>, mut pred: F) -> EngineEvent
where
    F: FnMut(&EngineEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            let event = events.recv().await.expect("engine stopped");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Poll `cond` until it holds.
pub async fn wait_until<F>(mut cond: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(Duration::from_secs(600), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time")
}

/// Round trip through the event loop so every earlier command is processed.
pub async fn settle(engine: &EngineHandle) {
    engine.is_joined(&room("settle")).await.unwrap();
}
