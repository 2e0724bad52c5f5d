#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Shared test utilities for Encore client integration tests.
//!
//! [`MockServer`] is an in-process fake of the Encore game server: it
//! records every frame the client sends, answers requests with either
//! scripted acknowledgments or built-in default behavior (identify, room
//! lifecycle, chunk collection, playlist pagination), and lets tests inject
//! pushes and drop the connection to exercise reconnection.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use encore_client::error::EncoreError;
use encore_client::store::{MemoryStore, SessionStore};
use encore_client::transport::{Connector, Transport};
use encore_client::{EncoreConfig, EncoreEvent};

/// Stable client id used by [`seeded_store`].
pub const TEST_CLIENT_ID: Uuid = Uuid::from_u128(0xC11E);

/// Room id the mock server places clients into by default.
pub const TEST_ROOM_ID: Uuid = Uuid::from_u128(0x400D);

/// Server timestamp reported by the mock server.
pub const TEST_SERVER_NOW: i64 = 1_700_000_000_000;

// ── Scripts ─────────────────────────────────────────────────────────

/// How the mock server acknowledges one request of a given type.
#[derive(Debug, Clone)]
pub enum AckScript {
    /// `ok: true` with this payload.
    Ok(Value),
    /// `ok: false` with this reason.
    Err(String),
    /// No acknowledgment at all (the request times out client-side).
    Ignore,
}

enum Feed {
    Msg(String),
    Error(String),
    Close,
}

struct ServerInner {
    /// Per-request-type scripted acks, consumed in order before defaults.
    scripts: HashMap<String, VecDeque<AckScript>>,
    /// Every frame the client sent, parsed.
    sent: Vec<Value>,
    /// Feed into the currently connected transport, if any.
    feed: Option<mpsc::UnboundedSender<Feed>>,
    /// Identity captured from the latest `identify`.
    client_id: Uuid,
    username: String,
    /// Items collected from `createRoom` / `uploadPlaylistChunk`.
    playlist: Vec<Value>,
    uploads_done: bool,
    /// Whether `resumeSession` succeeds by default.
    resume_ok: bool,
    auto_pong: bool,
    connects: u32,
}

/// In-process fake Encore server.
pub struct MockServer {
    inner: StdMutex<ServerInner>,
    /// Fail this many connection attempts before accepting one.
    fail_connects: AtomicU32,
}

impl MockServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: StdMutex::new(ServerInner {
                scripts: HashMap::new(),
                sent: Vec::new(),
                feed: None,
                client_id: Uuid::nil(),
                username: "Player".into(),
                playlist: Vec::new(),
                uploads_done: false,
                resume_ok: false,
                auto_pong: true,
                connects: 0,
            }),
            fail_connects: AtomicU32::new(0),
        })
    }

    /// Queue a scripted acknowledgment for the next request of `msg_type`.
    pub fn script(&self, msg_type: &str, script: AckScript) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .scripts
            .entry(msg_type.to_string())
            .or_default()
            .push_back(script);
    }

    pub fn script_ok(&self, msg_type: &str, payload: Value) {
        self.script(msg_type, AckScript::Ok(payload));
    }

    pub fn script_err(&self, msg_type: &str, reason: &str) {
        self.script(msg_type, AckScript::Err(reason.to_string()));
    }

    /// Make `resumeSession` succeed with the canned room state.
    pub fn allow_resume(&self) {
        self.inner.lock().unwrap().resume_ok = true;
    }

    /// Fail the next `n` connection attempts with an I/O error.
    pub fn fail_next_connects(&self, n: u32) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Inject a server push.
    pub fn push(&self, msg_type: &str, data: Value) {
        let frame = json!({ "type": msg_type, "data": data }).to_string();
        let inner = self.inner.lock().unwrap();
        if let Some(feed) = &inner.feed {
            let _ = feed.send(Feed::Msg(frame));
        }
    }

    /// Inject a raw (possibly malformed) frame.
    pub fn push_raw(&self, frame: &str) {
        let inner = self.inner.lock().unwrap();
        if let Some(feed) = &inner.feed {
            let _ = feed.send(Feed::Msg(frame.to_string()));
        }
    }

    /// Close the live connection cleanly (client sees EOF and reconnects).
    pub fn drop_connection(&self) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(feed) = inner.feed.take() {
            let _ = feed.send(Feed::Close);
        }
    }

    /// Fail the live connection with a transport error.
    pub fn break_connection(&self, reason: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(feed) = inner.feed.take() {
            let _ = feed.send(Feed::Error(reason.to_string()));
        }
    }

    /// All frames the client has sent, parsed.
    pub fn sent(&self) -> Vec<Value> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// Frames of one request type, in send order.
    pub fn sent_of_type(&self, msg_type: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|v| v["type"] == msg_type)
            .collect()
    }

    /// Number of accepted connections so far.
    pub fn connect_count(&self) -> u32 {
        self.inner.lock().unwrap().connects
    }

    /// Items collected from the chunked upload, in arrival order.
    pub fn collected_playlist(&self) -> Vec<Value> {
        self.inner.lock().unwrap().playlist.clone()
    }

    /// The canned room-state payload the default handlers answer with.
    pub fn room_state_payload(&self) -> Value {
        let inner = self.inner.lock().unwrap();
        room_state_value(&inner)
    }

    // ── Frame handling ──────────────────────────────────────────────

    fn handle_frame(&self, raw: &str) {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(_) => return,
        };
        let mut inner = self.inner.lock().unwrap();
        inner.sent.push(value.clone());

        let msg_type = value["type"].as_str().unwrap_or_default().to_string();
        let id = value["id"]
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok());
        let data = value["data"].clone();

        // Scripts win over default behavior.
        let script = inner
            .scripts
            .get_mut(&msg_type)
            .and_then(VecDeque::pop_front);
        if let Some(script) = script {
            match script {
                AckScript::Ok(payload) => ack_ok(&inner, id, payload),
                AckScript::Err(reason) => ack_err(&inner, id, &reason),
                AckScript::Ignore => {}
            }
            return;
        }

        match msg_type.as_str() {
            "identify" => {
                if let Some(client_id) = data["clientId"]
                    .as_str()
                    .and_then(|s| Uuid::parse_str(s).ok())
                {
                    inner.client_id = client_id;
                }
                if let Some(username) = data["username"].as_str() {
                    inner.username = username.to_string();
                }
                ack_ok(&inner, id, json!({ "serverNow": TEST_SERVER_NOW }));
            }
            "ping" => {
                if inner.auto_pong {
                    push_value(&inner, "pong", json!({ "serverNow": TEST_SERVER_NOW }));
                }
            }
            "createRoom" => {
                inner.playlist.clear();
                if let Some(items) = data["playlist"]["items"].as_array() {
                    inner.playlist.extend(items.iter().cloned());
                }
                inner.uploads_done = data["playlist"]["isLast"].as_bool().unwrap_or(false);
                let payload = room_state_value(&inner);
                ack_ok(&inner, id, payload);
            }
            "uploadPlaylistChunk" => {
                if let Some(items) = data["items"].as_array() {
                    inner.playlist.extend(items.iter().cloned());
                }
                if data["isLast"].as_bool().unwrap_or(false) {
                    inner.uploads_done = true;
                }
                ack_ok(&inner, id, Value::Null);
            }
            "joinRoom" => {
                let payload = room_state_value(&inner);
                ack_ok(&inner, id, payload);
            }
            "resumeSession" => {
                if inner.resume_ok {
                    let payload = room_state_value(&inner);
                    ack_ok(&inner, id, payload);
                } else {
                    ack_err(&inner, id, "room not found");
                }
            }
            "leaveRoom" => ack_ok(&inner, id, Value::Null),
            "sendMessage" => {
                let message = json!({
                    "id": Uuid::new_v4(),
                    "clientId": inner.client_id,
                    "username": inner.username,
                    "content": data["content"],
                    "sentAt": TEST_SERVER_NOW,
                });
                ack_ok(&inner, id, message.clone());
                push_value(
                    &inner,
                    "messageAdded",
                    json!({ "roomId": TEST_ROOM_ID, "message": message }),
                );
            }
            "startGame" => {
                ack_ok(
                    &inner,
                    id,
                    json!({
                        "gameState": { "status": "pending" },
                        "serverNow": TEST_SERVER_NOW,
                    }),
                );
            }
            "submitAnswer" => ack_ok(&inner, id, Value::Null),
            "getPlaylistPage" => {
                let page = data["page"].as_u64().unwrap_or(1).max(1) as usize;
                let size = data["pageSize"].as_u64().unwrap_or(50).max(1) as usize;
                let total = inner.playlist.len();
                let start = (page - 1).saturating_mul(size).min(total);
                let end = start.saturating_add(size).min(total);
                let items: Vec<Value> = inner.playlist[start..end].to_vec();
                let payload = json!({
                    "items": items,
                    "totalCount": total,
                    "page": page,
                    "pageSize": size,
                    "ready": inner.uploads_done,
                });
                ack_ok(&inner, id, payload);
            }
            _ => {}
        }
    }
}

fn room_state_value(inner: &ServerInner) -> Value {
    json!({
        "room": {
            "id": TEST_ROOM_ID,
            "name": "Test Room",
            "hasPassword": false,
            "hostClientId": inner.client_id,
            "gameSettings": { "questionCount": 10 },
        },
        "participants": [participant_value(inner.client_id, &inner.username)],
        "messages": [],
        "serverNow": TEST_SERVER_NOW,
    })
}

/// A participant object in wire format.
pub fn participant_value(client_id: Uuid, username: &str) -> Value {
    json!({
        "clientId": client_id,
        "username": username,
        "isOnline": true,
        "score": 0,
        "combo": 0,
    })
}

fn ack_ok(inner: &ServerInner, id: Option<Uuid>, payload: Value) {
    let Some(id) = id else { return };
    let data = if payload.is_null() {
        json!({ "id": id, "ok": true })
    } else {
        json!({ "id": id, "ok": true, "payload": payload })
    };
    push_value(inner, "ack", data);
}

fn ack_err(inner: &ServerInner, id: Option<Uuid>, reason: &str) {
    let Some(id) = id else { return };
    push_value(inner, "ack", json!({ "id": id, "ok": false, "error": reason }));
}

fn push_value(inner: &ServerInner, msg_type: &str, data: Value) {
    if let Some(feed) = &inner.feed {
        let frame = json!({ "type": msg_type, "data": data }).to_string();
        let _ = feed.send(Feed::Msg(frame));
    }
}

// ── Transport & connector ───────────────────────────────────────────

/// Transport half handed to the client; frames are routed to the server.
pub struct MockTransport {
    rx: mpsc::UnboundedReceiver<Feed>,
    server: Arc<MockServer>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), EncoreError> {
        self.server.handle_frame(&message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, EncoreError>> {
        match self.rx.recv().await {
            Some(Feed::Msg(frame)) => Some(Ok(frame)),
            Some(Feed::Error(reason)) => Some(Err(EncoreError::TransportReceive(reason))),
            Some(Feed::Close) | None => None,
        }
    }

    async fn close(&mut self) -> Result<(), EncoreError> {
        Ok(())
    }
}

/// [`Connector`] that attaches fresh [`MockTransport`]s to one [`MockServer`].
pub struct MockConnector {
    server: Arc<MockServer>,
}

impl MockConnector {
    pub fn new(server: &Arc<MockServer>) -> Box<Self> {
        Box::new(Self {
            server: Arc::clone(server),
        })
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&mut self) -> Result<Box<dyn Transport>, EncoreError> {
        let remaining = self.server.fail_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.server.fail_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(EncoreError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "mock connect failure",
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut inner = self.server.inner.lock().unwrap();
            inner.feed = Some(tx);
            inner.connects += 1;
        }
        Ok(Box::new(MockTransport {
            rx,
            server: Arc::clone(&self.server),
        }))
    }
}

// ── Store & config helpers ──────────────────────────────────────────

/// A memory store pre-seeded with a stable identity and display name.
///
/// Returned as an `Arc` so tests can keep a handle and inspect records after
/// handing a clone to the client.
pub fn seeded_store(display_name: &str) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let identity = json!({
        "clientId": TEST_CLIENT_ID,
        "displayName": display_name,
    });
    store.set("identity", &identity.to_string()).unwrap();
    store
}

/// Seed the last-known room id so the resume protocol fires on connect.
pub fn seed_last_room(store: &MemoryStore, room_id: Uuid) {
    store.set("lastRoomId", &room_id.to_string()).unwrap();
}

/// Fast timings for tests: short request timeout, near-instant reconnect
/// backoff, pings effectively disabled.
pub fn test_config() -> EncoreConfig {
    EncoreConfig::new()
        .with_request_timeout(Duration::from_millis(500))
        .with_reconnect_delays(Duration::from_millis(5), Duration::from_millis(20))
        .with_ping_interval(Duration::from_secs(3600))
        .with_shutdown_timeout(Duration::from_millis(500))
}

/// Await the next session event, panicking after two seconds.
pub async fn next_event(events: &mut mpsc::Receiver<EncoreEvent>) -> EncoreEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed")
}

/// Drain events until one matches `predicate`, panicking after two seconds.
pub async fn wait_for_event(
    events: &mut mpsc::Receiver<EncoreEvent>,
    predicate: impl Fn(&EncoreEvent) -> bool,
) -> EncoreEvent {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let event = tokio::time::timeout(remaining, events.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("event channel closed");
        if predicate(&event) {
            return event;
        }
    }
}
