//! Wire types for the Encore session protocol.
//!
//! Every message travels as a JSON text frame over one persistent connection.
//! Requests are wrapped in a [`RequestEnvelope`] carrying a uuid correlation
//! id; the server answers with an [`Ack`](ServerMessage::Ack) echoing that id.
//! Everything else the server sends is an unsolicited push.
//!
//! Wire names are camelCase to match the server's JSON format exactly
//! (`resumeSession`, `participantsUpdated`, `receivedCount`, …).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Type aliases ────────────────────────────────────────────────────

/// Unique identifier for rooms.
pub type RoomId = Uuid;

/// Unique identifier for client identities (stable per device, not per socket).
pub type ClientId = Uuid;

/// Unique identifier for one playlist upload attempt.
pub type UploadId = Uuid;

/// Milliseconds since the Unix epoch, on the server's timeline.
pub type EpochMs = i64;

// ── Room & participant types ────────────────────────────────────────

/// Game configuration chosen by the room host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GameSettings {
    /// Number of questions played per game.
    pub question_count: u32,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self { question_count: 10 }
    }
}

/// Read-only projection of a room in the lobby list.
///
/// Superseded wholesale on each `roomsUpdated` push — never merged
/// field-by-field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: String,
    pub has_password: bool,
    pub player_count: u32,
    pub playlist_count: u32,
    pub game_settings: GameSettings,
}

/// Details of the room the client is currently joined to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDetail {
    pub id: RoomId,
    pub name: String,
    pub has_password: bool,
    pub host_client_id: ClientId,
    pub game_settings: GameSettings,
}

/// A participant in the joined room, keyed by `client_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub client_id: ClientId,
    pub username: String,
    pub is_online: bool,
    pub score: i64,
    pub combo: u32,
}

/// One chat message; append-only and server-ordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub client_id: ClientId,
    pub username: String,
    pub content: String,
    pub sent_at: EpochMs,
}

// ── Playlist types ──────────────────────────────────────────────────

/// One playlist entry. Immutable once received.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItem {
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

impl PlaylistItem {
    /// De-duplication key: the YouTube video id when one can be extracted
    /// from the URL, otherwise the trimmed, lowercased URL itself.
    ///
    /// Identity is derived from the key, never from array position.
    pub fn dedup_key(&self) -> String {
        let url = self.url.trim();
        if let Some(rest) = url.split("v=").nth(1) {
            let id = rest.split(&['&', '#'][..]).next().unwrap_or(rest);
            if !id.is_empty() {
                return id.to_string();
            }
        }
        if let Some(rest) = url.split("youtu.be/").nth(1) {
            let id = rest.split(&['?', '&', '#'][..]).next().unwrap_or(rest);
            if !id.is_empty() {
                return id.to_string();
            }
        }
        url.to_ascii_lowercase()
    }
}

/// Playlist descriptor embedded in a `createRoom` request.
///
/// Carries the first upload batch; remaining batches follow as
/// `uploadPlaylistChunk` requests under the same `upload_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistUpload {
    pub upload_id: UploadId,
    pub id: Uuid,
    pub total_count: u32,
    pub items: Vec<PlaylistItem>,
    pub is_last: bool,
    pub page_size: u32,
}

/// One page of playlist items, as returned by `getPlaylistPage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistPage {
    pub items: Vec<PlaylistItem>,
    pub total_count: u32,
    pub page: u32,
    pub page_size: u32,
    /// True once the server has ingested the complete upload. The client
    /// never infers readiness from local accumulation.
    pub ready: bool,
}

// ── Game state ──────────────────────────────────────────────────────

/// One answer choice presented during the guess phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Choice {
    pub index: u32,
    pub title: String,
}

/// Sub-state of an active round.
///
/// `Reveal` structurally requires the answer title and the reveal deadline,
/// so a reveal phase without an answer is unrepresentable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "phase", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum RoundPhase {
    /// Answering window is open.
    Guess,
    /// Answer shown, scoring settled.
    Reveal {
        reveal_ends_at: EpochMs,
        answer_title: String,
    },
}

/// State of the round currently being played.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoundState {
    /// Server timestamp at which the current guess window opened.
    pub started_at: EpochMs,
    pub guess_duration_ms: u64,
    pub reveal_duration_ms: u64,
    /// Playback order as indices into the full playlist.
    pub track_order: Vec<u32>,
    /// Position within `track_order`.
    pub track_cursor: u32,
    pub choices: Vec<Choice>,
    #[serde(flatten)]
    pub phase: RoundPhase,
}

impl RoundState {
    /// Server-timeline deadline of the guess window.
    pub fn guess_ends_at(&self) -> EpochMs {
        self.started_at.saturating_add(self.guess_duration_ms as i64)
    }
}

/// Server-owned game lifecycle, tagged by `status`.
///
/// Created on the start-game acknowledgment, replaced wholesale by
/// `gameStarted`/`gameUpdated` pushes, terminal at `Ended`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum GameState {
    /// Game requested but the first round has not opened yet.
    Pending,
    /// A round is in progress.
    Playing(RoundState),
    /// Game over.
    Ended,
}

impl GameState {
    pub fn is_ended(&self) -> bool {
        matches!(self, Self::Ended)
    }

    /// The active round, if a round is in progress.
    pub fn round(&self) -> Option<&RoundState> {
        match self {
            Self::Playing(round) => Some(round),
            Self::Pending | Self::Ended => None,
        }
    }
}

// ── Identity ────────────────────────────────────────────────────────

/// Profile returned by the OAuth code-exchange boundary. Stored whole.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

// ── Ack payload shapes ──────────────────────────────────────────────

/// Full room aggregate returned by `createRoom`, `joinRoom` and
/// `resumeSession` acknowledgments. A resume snapshot has the identical
/// shape to a fresh join.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStatePayload {
    pub room: RoomDetail,
    pub participants: Vec<Participant>,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_state: Option<GameState>,
    pub server_now: EpochMs,
}

/// Acknowledgment payload for `identify`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyAck {
    pub server_now: EpochMs,
}

/// Acknowledgment payload for `startGame`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartGameAck {
    pub game_state: GameState,
    pub server_now: EpochMs,
}

// ── Messages ────────────────────────────────────────────────────────

/// Request bodies sent from client to server.
///
/// Each request travels inside a [`RequestEnvelope`]; the lone exception is
/// [`Ping`](ClientRequest::Ping), which is fire-and-forget and answered by a
/// `pong` push instead of an ack.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientRequest {
    /// Authenticate the connection (MUST be the first message).
    Identify {
        client_id: ClientId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auth_token: Option<String>,
    },
    /// Reattach to a previously joined room instead of a fresh join.
    ResumeSession { room_id: RoomId, username: String },
    /// Create a room, carrying the first playlist batch.
    CreateRoom {
        room_name: String,
        username: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
        game_settings: GameSettings,
        playlist: PlaylistUpload,
    },
    /// One follow-up playlist batch for an in-progress upload.
    UploadPlaylistChunk {
        room_id: RoomId,
        upload_id: UploadId,
        items: Vec<PlaylistItem>,
        is_last: bool,
    },
    /// Join an existing room.
    JoinRoom {
        room_id: RoomId,
        username: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    /// Leave the current room.
    LeaveRoom { room_id: RoomId },
    /// Post a chat message to the current room.
    SendMessage { content: String },
    /// Start the game (host only).
    StartGame { room_id: RoomId },
    /// Answer the current question.
    SubmitAnswer { room_id: RoomId, choice_index: u32 },
    /// Fetch one page of the room playlist.
    GetPlaylistPage {
        room_id: RoomId,
        page: u32,
        page_size: u32,
    },
    /// Latency probe. Answered by a `pong` push carrying `serverNow`.
    Ping,
}

/// A request with its correlation id, as serialized on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: Uuid,
    #[serde(flatten)]
    pub body: ClientRequest,
}

/// Acknowledgment of one request, echoing its correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckPayload {
    /// Correlation id of the request being acknowledged.
    pub id: Uuid,
    pub ok: bool,
    /// Success payload; shape depends on the request type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Rejection reason when `ok` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Messages sent from server to client: acks plus unsolicited pushes.
///
/// Every push that concerns a specific room carries that room's id so the
/// client can discard stale events from a room it has already left.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// Acknowledgment of a client request.
    Ack(AckPayload),
    /// Lobby room list, superseded wholesale.
    RoomsUpdated { rooms: Vec<RoomSummary> },
    /// Another client joined the room.
    JoinedRoom {
        room_id: RoomId,
        participant: Participant,
    },
    /// Participant list replaced wholesale, including host designation.
    ParticipantsUpdated {
        room_id: RoomId,
        participants: Vec<Participant>,
        host_client_id: ClientId,
    },
    /// A participant left the room.
    UserLeft { room_id: RoomId, client_id: ClientId },
    /// Server-side ingestion progress for a chunked playlist upload.
    PlaylistProgress {
        room_id: RoomId,
        upload_id: UploadId,
        received_count: u32,
        total_count: u32,
        ready: bool,
    },
    /// The room playlist was replaced; cached pages are stale.
    ///
    /// The inline `playlist` is a courtesy copy of the leading items; the
    /// client re-paginates from page 1 rather than trusting it.
    PlaylistUpdated {
        room_id: RoomId,
        #[serde(default)]
        playlist: Vec<PlaylistItem>,
    },
    /// New chat message, server-ordered.
    MessageAdded { room_id: RoomId, message: ChatMessage },
    /// Game started (boxed to reduce enum size).
    GameStarted {
        room_id: RoomId,
        game_state: Box<GameState>,
        server_now: EpochMs,
    },
    /// Game state replaced wholesale.
    GameUpdated {
        room_id: RoomId,
        game_state: Box<GameState>,
        server_now: EpochMs,
    },
    /// Reply to a `ping` probe; carries an authoritative server timestamp.
    Pong { server_now: EpochMs },
}

impl ServerMessage {
    /// The room id this push is scoped to, if any.
    pub fn room_id(&self) -> Option<RoomId> {
        match self {
            Self::JoinedRoom { room_id, .. }
            | Self::ParticipantsUpdated { room_id, .. }
            | Self::UserLeft { room_id, .. }
            | Self::PlaylistProgress { room_id, .. }
            | Self::PlaylistUpdated { room_id, .. }
            | Self::MessageAdded { room_id, .. }
            | Self::GameStarted { room_id, .. }
            | Self::GameUpdated { room_id, .. } => Some(*room_id),
            Self::Ack(_) | Self::RoomsUpdated { .. } | Self::Pong { .. } => None,
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn dedup_key_extracts_watch_param() {
        let item = PlaylistItem {
            title: "t".into(),
            url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PL1".into(),
            uploader: None,
            duration_secs: None,
            thumbnail: None,
        };
        assert_eq!(item.dedup_key(), "dQw4w9WgXcQ");
    }

    #[test]
    fn dedup_key_extracts_short_url() {
        let item = PlaylistItem {
            title: "t".into(),
            url: "https://youtu.be/dQw4w9WgXcQ?t=30".into(),
            uploader: None,
            duration_secs: None,
            thumbnail: None,
        };
        assert_eq!(item.dedup_key(), "dQw4w9WgXcQ");
    }

    #[test]
    fn dedup_key_falls_back_to_normalized_url() {
        let item = PlaylistItem {
            title: "t".into(),
            url: "  https://Example.com/Track.mp3 ".into(),
            uploader: None,
            duration_secs: None,
            thumbnail: None,
        };
        assert_eq!(item.dedup_key(), "https://example.com/track.mp3");
    }

    #[test]
    fn game_state_reveal_requires_answer_title() {
        // A reveal phase without answerTitle must fail to deserialize.
        let json = r#"{"status":"playing","startedAt":0,"guessDurationMs":1,
            "revealDurationMs":1,"trackOrder":[],"trackCursor":0,
            "choices":[],"phase":"reveal","revealEndsAt":5}"#;
        assert!(serde_json::from_str::<GameState>(json).is_err());
    }

    #[test]
    fn game_state_guess_phase_round_trips() {
        let state = GameState::Playing(RoundState {
            started_at: 1_000,
            guess_duration_ms: 20_000,
            reveal_duration_ms: 5_000,
            track_order: vec![2, 0, 1],
            track_cursor: 1,
            choices: vec![Choice {
                index: 0,
                title: "Song A".into(),
            }],
            phase: RoundPhase::Guess,
        });
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains(r#""status":"playing""#));
        assert!(json.contains(r#""phase":"guess""#));
        let back: GameState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn guess_ends_at_adds_duration() {
        let round = RoundState {
            started_at: 10_000,
            guess_duration_ms: 20_000,
            reveal_duration_ms: 5_000,
            track_order: vec![],
            track_cursor: 0,
            choices: vec![],
            phase: RoundPhase::Guess,
        };
        assert_eq!(round.guess_ends_at(), 30_000);
    }

    #[test]
    fn request_envelope_flattens_body() {
        let envelope = RequestEnvelope {
            id: Uuid::from_u128(7),
            body: ClientRequest::LeaveRoom {
                room_id: Uuid::from_u128(9),
            },
        };
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["type"], "leaveRoom");
        assert!(value["id"].is_string());
        assert!(value["data"]["roomId"].is_string());
    }
}
