//! Room session state machine and the [`EncoreClient`] facade.
//!
//! [`EncoreClient`] composes the connection manager, the persistence layer,
//! the playlist transfer engine and the server-clock reconciler into one
//! synchronizer. It owns the joined-room aggregate exclusively: every
//! mutation after the initial join originates from a server push or an
//! acknowledged request, never from a speculative local update.
//!
//! A background pump task consumes connection events. On every transition
//! into `connected` it runs the session resume protocol *before* reporting
//! `SessionResolved`, so the UI never renders stale room data. On every
//! transition out of `connected` all room-scoped state is cleared — the
//! server is the sole source of truth for membership.
//!
//! Stale asynchronous completions (a page fetch finishing after a room
//! switch, an upload chunk outliving a leave) are rejected by comparing a
//! session generation counter captured at request time against the current
//! one; mismatches are silently dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::ServerClock;
use crate::connection::{ConnEvent, Connection, EncoreConfig};
use crate::error::{EncoreError, Result};
use crate::event::EncoreEvent;
use crate::playlist::{batches, dedup_items, PlaylistTransferState, PlaylistView};
use crate::protocol::{
    ChatMessage, ClientId, ClientRequest, EpochMs, GameSettings, GameState, Participant,
    PlaylistItem, PlaylistPage, PlaylistUpload, RoomDetail, RoomId, RoomStatePayload, RoomSummary,
    ServerMessage, StartGameAck, UserProfile,
};
use crate::store::{ClientIdentity, SessionStorage, SessionStore};
use crate::transport::Connector;

// ── Parameters ──────────────────────────────────────────────────────

/// Parameters for creating a room.
///
/// `room_name` and a non-empty `playlist` are required; everything else has
/// defaults.
///
/// # Example
///
/// ```
/// use encore_client::CreateRoomParams;
///
/// let params = CreateRoomParams::new("friday night")
///     .with_password("hunter2")
///     .with_question_count(15);
/// assert_eq!(params.room_name, "friday night");
/// ```
#[derive(Debug, Clone, Default)]
pub struct CreateRoomParams {
    /// Display name of the room.
    pub room_name: String,
    /// Optional join password.
    pub password: Option<String>,
    /// Questions per game; falls back to the persisted preference, then 10.
    pub question_count: Option<u32>,
    /// The locally fetched playlist to upload.
    pub playlist: Vec<PlaylistItem>,
}

impl CreateRoomParams {
    pub fn new(room_name: impl Into<String>) -> Self {
        Self {
            room_name: room_name.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn with_question_count(mut self, count: u32) -> Self {
        self.question_count = Some(count);
        self
    }

    #[must_use]
    pub fn with_playlist(mut self, playlist: Vec<PlaylistItem>) -> Self {
        self.playlist = playlist;
        self
    }
}

// ── State ───────────────────────────────────────────────────────────

/// Which screen the synchronizer is driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionView {
    /// Not in a room; showing the lobby list.
    RoomList,
    /// In a room, chat screen.
    Chat,
    /// In a room, game screen.
    Game,
}

/// Cloneable snapshot of the joined-room aggregate.
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub room: RoomDetail,
    pub participants: Vec<Participant>,
    pub messages: Vec<ChatMessage>,
    pub game_state: Option<GameState>,
}

/// The authoritative joined-room aggregate.
struct RoomAggregate {
    room: RoomDetail,
    participants: Vec<Participant>,
    messages: Vec<ChatMessage>,
    game_state: Option<GameState>,
}

impl RoomAggregate {
    fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room: self.room.clone(),
            participants: self.participants.clone(),
            messages: self.messages.clone(),
            game_state: self.game_state.clone(),
        }
    }
}

struct SessionState {
    view: SessionView,
    room: Option<RoomAggregate>,
    rooms: Vec<RoomSummary>,
    clock: ServerClock,
    playlist: PlaylistView,
    transfer: Option<PlaylistTransferState>,
}

impl SessionState {
    fn new(page_size: u32) -> Self {
        Self {
            view: SessionView::RoomList,
            room: None,
            rooms: Vec::new(),
            clock: ServerClock::new(),
            playlist: PlaylistView::new(page_size),
            transfer: None,
        }
    }

    fn room_id(&self) -> Option<RoomId> {
        self.room.as_ref().map(|r| r.room.id)
    }

    /// Drop everything scoped to the current room. Returns whether a room
    /// was live.
    fn clear_room_scope(&mut self) -> bool {
        let had_room = self.room.is_some();
        self.room = None;
        self.view = SessionView::RoomList;
        self.playlist.clear();
        self.transfer = None;
        had_room
    }
}

struct SessionShared {
    state: StdMutex<SessionState>,
    generation: AtomicU64,
    storage: SessionStorage,
    identity: Arc<StdMutex<ClientIdentity>>,
    config: EncoreConfig,
}

impl SessionShared {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        // Recover rather than propagate poison: state mutation sections
        // cannot leave the aggregate partially applied.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn identity(&self) -> ClientIdentity {
        self.identity
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn username(&self) -> Result<String> {
        self.identity()
            .username()
            .map(str::to_owned)
            .ok_or_else(|| EncoreError::Invalid("display name not set".into()))
    }

    /// Replace the aggregate from a join/create/resume acknowledgment.
    ///
    /// Rejected (returns `None`) when the session generation moved between
    /// the request and this completion.
    fn apply_room_state(&self, generation: u64, payload: RoomStatePayload) -> Option<RoomSnapshot> {
        let mut state = self.state();
        if self.generation() != generation {
            debug!("dropping stale room-state completion");
            return None;
        }
        self.bump_generation();

        let room_id = payload.room.id;
        state.clock.sync(payload.server_now);
        state.view = match &payload.game_state {
            Some(game) if !game.is_ended() => SessionView::Game,
            _ => SessionView::Chat,
        };
        state.playlist.reset(room_id);
        state.transfer = None;

        let aggregate = RoomAggregate {
            room: payload.room,
            participants: dedup_participants(payload.participants),
            messages: payload.messages,
            game_state: payload.game_state,
        };
        let snapshot = aggregate.snapshot();
        state.room = Some(aggregate);
        drop(state);

        if let Err(e) = self.storage.set_last_room_id(room_id) {
            warn!("failed to persist room id: {e}");
        }
        Some(snapshot)
    }
}

/// Wholesale participant lists come from the server already unique; keep the
/// first entry per client id regardless.
fn dedup_participants(participants: Vec<Participant>) -> Vec<Participant> {
    let mut seen = std::collections::HashSet::with_capacity(participants.len());
    participants
        .into_iter()
        .filter(|p| seen.insert(p.client_id))
        .collect()
}

// ── Client facade ───────────────────────────────────────────────────

/// The Encore session synchronizer.
///
/// Created via [`EncoreClient::start`], which loads the persisted identity,
/// spawns the connection supervisor and the session pump, and returns the
/// handle together with the UI event receiver.
///
/// Request methods are async and resolve once the server acknowledged (or
/// rejected) the request; a failed request leaves prior state untouched.
/// Reads go through cheap snapshot accessors.
pub struct EncoreClient {
    conn: Arc<Connection>,
    shared: Arc<SessionShared>,
    pump: StdMutex<Option<tokio::task::JoinHandle<()>>>,
    shutdown_timeout: Duration,
}

impl EncoreClient {
    /// Start the synchronizer.
    ///
    /// # Errors
    ///
    /// Returns [`EncoreError::Storage`] (or an I/O error) when the persisted
    /// identity cannot be loaded or created.
    #[must_use = "the event receiver must be consumed to observe session events"]
    pub fn start(
        connector: Box<dyn Connector>,
        store: impl SessionStore,
        config: EncoreConfig,
    ) -> Result<(Self, mpsc::Receiver<EncoreEvent>)> {
        let storage = SessionStorage::new(store);
        let identity = Arc::new(StdMutex::new(storage.load_or_create_identity()?));

        let (conn, conn_events) = Connection::start(connector, Arc::clone(&identity), &config);
        let conn = Arc::new(conn);

        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<EncoreEvent>(capacity);

        let shutdown_timeout = config.shutdown_timeout;
        let shared = Arc::new(SessionShared {
            state: StdMutex::new(SessionState::new(config.playlist_page_size)),
            generation: AtomicU64::new(0),
            storage,
            identity,
            config,
        });

        let pump = tokio::spawn(session_pump(
            Arc::clone(&conn),
            Arc::clone(&shared),
            conn_events,
            event_tx,
        ));

        let client = Self {
            conn,
            shared,
            pump: StdMutex::new(Some(pump)),
            shutdown_timeout,
        };
        Ok((client, event_rx))
    }

    // ── Identity ────────────────────────────────────────────────────

    /// The stable client id of this device.
    pub fn client_id(&self) -> ClientId {
        self.shared.identity().client_id
    }

    /// A copy of the current identity record.
    pub fn identity(&self) -> ClientIdentity {
        self.shared.identity()
    }

    /// Set the display name and persist the identity record.
    pub fn set_display_name(&self, name: impl Into<String>) -> Result<()> {
        self.update_identity(|identity| identity.display_name = Some(name.into()))
    }

    /// Store the bearer token and profile returned by the OAuth boundary.
    pub fn login(&self, auth_token: impl Into<String>, profile: UserProfile) -> Result<()> {
        self.update_identity(|identity| {
            identity.auth_token = Some(auth_token.into());
            identity.auth_user = Some(profile);
        })
    }

    /// Clear the authenticated identity; the client id survives.
    pub fn logout(&self) -> Result<()> {
        self.update_identity(|identity| {
            identity.auth_token = None;
            identity.auth_user = None;
        })
    }

    fn update_identity(&self, mutate: impl FnOnce(&mut ClientIdentity)) -> Result<()> {
        let updated = {
            let mut identity = self
                .shared
                .identity
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            mutate(&mut identity);
            identity.clone()
        };
        self.shared.storage.save_identity(&updated)
    }

    // ── Snapshot accessors ──────────────────────────────────────────

    /// Returns `true` while the connection is up and authenticated.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// The screen the synchronizer is currently driving.
    pub fn view(&self) -> SessionView {
        self.shared.state().view
    }

    /// The lobby room list (latest `roomsUpdated` push).
    pub fn rooms(&self) -> Vec<RoomSummary> {
        self.shared.state().rooms.clone()
    }

    /// Snapshot of the joined-room aggregate, if in a room.
    pub fn snapshot(&self) -> Option<RoomSnapshot> {
        self.shared.state().room.as_ref().map(RoomAggregate::snapshot)
    }

    /// The accumulated playlist display cache.
    pub fn playlist_items(&self) -> Vec<PlaylistItem> {
        self.shared.state().playlist.items().to_vec()
    }

    /// Total playlist length reported by the server.
    pub fn playlist_total(&self) -> u32 {
        self.shared.state().playlist.total_count()
    }

    /// Whether the server holds more playlist items than the display cache.
    pub fn playlist_has_more(&self) -> bool {
        self.shared.state().playlist.has_more()
    }

    /// Ingestion progress of the current upload, if one is known.
    pub fn transfer_progress(&self) -> Option<PlaylistTransferState> {
        self.shared.state().transfer
    }

    /// Milliseconds remaining until a server-timeline deadline.
    pub fn remaining_ms(&self, deadline: EpochMs) -> u64 {
        self.shared.state().clock.remaining_ms(deadline)
    }

    /// The current moment projected onto the server timeline.
    pub fn server_now_ms(&self) -> EpochMs {
        self.shared.state().clock.server_now_ms()
    }

    /// The persisted question-count preference.
    pub fn question_count_preference(&self) -> Option<u32> {
        self.shared.storage.question_count().unwrap_or_default()
    }

    /// Persist the question-count preference.
    pub fn set_question_count_preference(&self, count: u32) -> Result<()> {
        self.shared.storage.set_question_count(count)
    }

    // ── Room requests ───────────────────────────────────────────────

    /// Create a room and upload the playlist in bounded sequential batches.
    ///
    /// The first batch travels inside the `createRoom` request; the method
    /// resolves once the room is joined *and* every follow-up chunk has been
    /// acknowledged. Ingestion progress and readiness arrive independently
    /// as [`PlaylistProgress`](EncoreEvent::PlaylistProgress) events.
    ///
    /// # Errors
    ///
    /// [`EncoreError::Invalid`] for an empty room name, missing display
    /// name, or empty playlist — caught before any request is sent. A lost
    /// chunk acknowledgment surfaces as the underlying connection error; the
    /// upload is never retried automatically, and a resumed session
    /// re-derives playlist readiness from the server.
    pub async fn create_room(&self, params: CreateRoomParams) -> Result<RoomSnapshot> {
        let room_name = params.room_name.trim().to_owned();
        if room_name.is_empty() {
            return Err(EncoreError::Invalid("room name must not be empty".into()));
        }
        if params.playlist.is_empty() {
            return Err(EncoreError::Invalid("no playlist loaded".into()));
        }
        let username = self.shared.username()?;

        let items = dedup_items(params.playlist);
        let total_count = items.len() as u32;
        let question_count = params
            .question_count
            .or_else(|| self.question_count_preference())
            .unwrap_or_else(|| GameSettings::default().question_count);

        let chunk_size = self.shared.config.upload_chunk_size;
        let page_size = self.shared.config.playlist_page_size;
        let upload_id = Uuid::new_v4();
        let playlist_id = Uuid::new_v4();
        let all_batches = batches(&items, chunk_size);
        let (first, rest) = match all_batches.split_first() {
            Some(split) => split,
            None => return Err(EncoreError::Invalid("no playlist loaded".into())),
        };

        let generation = self.shared.generation();
        let payload: RoomStatePayload = self
            .conn
            .request_as(ClientRequest::CreateRoom {
                room_name,
                username,
                password: params.password.clone(),
                game_settings: GameSettings { question_count },
                playlist: PlaylistUpload {
                    upload_id,
                    id: playlist_id,
                    total_count,
                    items: first.items.to_vec(),
                    is_last: first.is_last,
                    page_size,
                },
            })
            .await?;

        let room_id = payload.room.id;
        let snapshot = self
            .shared
            .apply_room_state(generation, payload)
            .ok_or_else(|| EncoreError::Invalid("room context changed".into()))?;

        {
            // A progress push may have raced ahead of this; never clobber it.
            let mut state = self.shared.state();
            if state.transfer.is_none() {
                state.transfer =
                    Some(PlaylistTransferState::new(upload_id, total_count, page_size));
            }
        }
        if let Some(password) = &params.password {
            if let Err(e) = self.shared.storage.set_room_password(room_id, password) {
                warn!("failed to cache room password: {e}");
            }
        }

        // The display fetch is independent of the chunked upload state.
        self.fetch_initial_page().await;

        // Remaining batches: strict sequential backpressure, each awaiting
        // its ack before the next is sent. Never parallel-fanned.
        let upload_generation = self.shared.generation();
        for batch in rest {
            if self.shared.generation() != upload_generation {
                debug!("abandoning upload: session moved on");
                break;
            }
            self.conn
                .request(ClientRequest::UploadPlaylistChunk {
                    room_id,
                    upload_id,
                    items: batch.items.to_vec(),
                    is_last: batch.is_last,
                })
                .await?;
        }

        Ok(snapshot)
    }

    /// Join an existing room.
    ///
    /// When no password is given, a previously cached password for that room
    /// is sent, if any.
    pub async fn join_room(
        &self,
        room_id: RoomId,
        password: Option<String>,
    ) -> Result<RoomSnapshot> {
        let username = self.shared.username()?;
        let password = match password {
            Some(password) => Some(password),
            None => self.shared.storage.room_password(room_id).unwrap_or_default(),
        };

        let generation = self.shared.generation();
        let payload: RoomStatePayload = self
            .conn
            .request_as(ClientRequest::JoinRoom {
                room_id,
                username,
                password: password.clone(),
            })
            .await?;

        let snapshot = self
            .shared
            .apply_room_state(generation, payload)
            .ok_or_else(|| EncoreError::Invalid("room context changed".into()))?;

        if let Some(password) = &password {
            if let Err(e) = self.shared.storage.set_room_password(room_id, password) {
                warn!("failed to cache room password: {e}");
            }
        }

        self.fetch_initial_page().await;
        Ok(snapshot)
    }

    /// Leave the current room. On success the aggregate and the persisted
    /// room id are cleared; on failure prior state is untouched.
    pub async fn leave_room(&self) -> Result<()> {
        let room_id = self
            .shared
            .state()
            .room_id()
            .ok_or(EncoreError::NotInRoom)?;

        self.conn
            .request(ClientRequest::LeaveRoom { room_id })
            .await?;

        {
            let mut state = self.shared.state();
            state.clear_room_scope();
        }
        self.shared.bump_generation();
        if let Err(e) = self.shared.storage.clear_last_room_id() {
            warn!("failed to clear persisted room id: {e}");
        }
        Ok(())
    }

    /// Post a chat message. The acknowledged message is returned; it is
    /// appended to the aggregate by the `messageAdded` push, in server order.
    pub async fn send_message(&self, content: impl Into<String>) -> Result<ChatMessage> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(EncoreError::Invalid("message must not be empty".into()));
        }
        if self.shared.state().room.is_none() {
            return Err(EncoreError::NotInRoom);
        }
        self.conn
            .request_as(ClientRequest::SendMessage { content })
            .await
    }

    /// Start the game (host only). Switches to the game view and fetches the
    /// complete playlist, which index-based track lookups require.
    pub async fn start_game(&self) -> Result<()> {
        let room_id = self
            .shared
            .state()
            .room_id()
            .ok_or(EncoreError::NotInRoom)?;

        let generation = self.shared.generation();
        let ack: StartGameAck = self
            .conn
            .request_as(ClientRequest::StartGame { room_id })
            .await?;

        {
            let mut state = self.shared.state();
            if self.shared.generation() != generation || state.room_id() != Some(room_id) {
                debug!("dropping stale start-game completion");
                return Ok(());
            }
            state.clock.sync(ack.server_now);
            if let Some(room) = state.room.as_mut() {
                room.game_state = Some(ack.game_state);
            }
            state.view = SessionView::Game;
        }

        self.ensure_full_playlist().await?;
        Ok(())
    }

    /// Submit an answer for the current question.
    pub async fn submit_answer(&self, choice_index: u32) -> Result<()> {
        let room_id = {
            let state = self.shared.state();
            if state.view != SessionView::Game {
                return Err(EncoreError::Invalid("no game in progress".into()));
            }
            state.room_id().ok_or(EncoreError::NotInRoom)?
        };
        self.conn
            .request(ClientRequest::SubmitAnswer {
                room_id,
                choice_index,
            })
            .await?;
        Ok(())
    }

    // ── Playlist reads ──────────────────────────────────────────────

    /// Fetch the next playlist page into the display cache ("load more").
    ///
    /// Returns `false` without issuing a request when a fetch is already in
    /// flight or the cache is complete (monotonic single-flight per room).
    pub async fn load_more_playlist(&self) -> Result<bool> {
        let Some((room_id, page)) = self.shared.state().playlist.begin_append() else {
            return Ok(false);
        };
        self.fetch_page(room_id, page).await
    }

    /// Discard the display cache and refetch page 1.
    pub async fn refresh_playlist(&self) -> Result<()> {
        let room_id = self
            .shared
            .state()
            .room_id()
            .ok_or(EncoreError::NotInRoom)?;
        let next = {
            let mut state = self.shared.state();
            state.playlist.reset(room_id);
            state.playlist.begin_append()
        };
        if let Some((room_id, page)) = next {
            self.fetch_page(room_id, page).await?;
        }
        Ok(())
    }

    /// Fetch pages until the cache holds the complete playlist.
    ///
    /// Stops early when a page comes back empty, which guards against an
    /// infinite loop should the server misreport `totalCount`. Returns the
    /// number of cached items.
    pub async fn ensure_full_playlist(&self) -> Result<usize> {
        fetch_complete_playlist(&self.conn, &self.shared).await
    }

    async fn fetch_page(&self, room_id: RoomId, page: u32) -> Result<bool> {
        let page_size = self.shared.state().playlist.page_size();
        let result: Result<PlaylistPage> = self
            .conn
            .request_as(ClientRequest::GetPlaylistPage {
                room_id,
                page,
                page_size,
            })
            .await;
        match result {
            Ok(fetched) => Ok(self.shared.state().playlist.apply_page(room_id, fetched)),
            Err(e) => {
                self.shared.state().playlist.abort_fetch(room_id);
                Err(e)
            }
        }
    }

    /// Initial page-1 fetch after entering a room. Failures are logged, not
    /// surfaced: the page can always be refetched via "load more".
    async fn fetch_initial_page(&self) {
        let next = self.shared.state().playlist.begin_append();
        if let Some((room_id, page)) = next {
            if let Err(e) = self.fetch_page(room_id, page).await {
                debug!("initial playlist page fetch failed: {e}");
            }
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Shut down the synchronizer: close the connection, stop the pump and
    /// deliver the final [`Disconnected`](EncoreEvent::Disconnected) event.
    pub async fn shutdown(&self) {
        self.conn.shutdown().await;

        let pump = self.pump.lock().ok().and_then(|mut pump| pump.take());
        if let Some(mut pump) = pump {
            match tokio::time::timeout(self.shutdown_timeout, &mut pump).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => warn!("session pump terminated with join error: {join_err}"),
                Err(_) => {
                    warn!("session pump did not exit within timeout; aborting task");
                    pump.abort();
                    let _ = pump.await;
                }
            }
        }
    }
}

impl std::fmt::Debug for EncoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoreClient")
            .field("connected", &self.is_connected())
            .field("view", &self.shared.state().view)
            .finish_non_exhaustive()
    }
}

impl Drop for EncoreClient {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().ok().and_then(|mut pump| pump.take()) {
            pump.abort();
        }
    }
}

// ── Session pump ────────────────────────────────────────────────────

/// Consume connection events, mutate the aggregate and emit UI events.
///
/// Runs until the connection event channel closes. Handlers run to
/// completion; the aggregate is only ever locked for short, non-awaiting
/// critical sections.
async fn session_pump(
    conn: Arc<Connection>,
    shared: Arc<SessionShared>,
    mut conn_events: mpsc::Receiver<ConnEvent>,
    event_tx: mpsc::Sender<EncoreEvent>,
) {
    debug!("session pump started");

    while let Some(event) = conn_events.recv().await {
        match event {
            ConnEvent::Up { server_now } => {
                shared.state().clock.sync(server_now);
                emit(&event_tx, EncoreEvent::Connected).await;
                let resumed = resume_session(&conn, &shared, &event_tx).await;
                emit(&event_tx, EncoreEvent::SessionResolved { resumed }).await;
            }
            ConnEvent::Reconnecting { attempt } => {
                let had_room = {
                    let mut state = shared.state();
                    state.clear_room_scope()
                };
                shared.bump_generation();
                if had_room {
                    emit(&event_tx, EncoreEvent::RoomLeft).await;
                }
                emit(&event_tx, EncoreEvent::Reconnecting { attempt }).await;
            }
            ConnEvent::Down { reason } => {
                let had_room = {
                    let mut state = shared.state();
                    state.clear_room_scope()
                };
                shared.bump_generation();
                if had_room {
                    emit(&event_tx, EncoreEvent::RoomLeft).await;
                }
                // Always delivered, even under backpressure.
                if event_tx
                    .send(EncoreEvent::Disconnected { reason })
                    .await
                    .is_err()
                {
                    debug!("session event channel closed, receiver dropped");
                }
            }
            ConnEvent::Push(msg) => {
                handle_push(&conn, &shared, &event_tx, msg).await;
            }
        }
    }

    debug!("session pump exited");
}

/// The session resume protocol: reattach to the persisted room, if any.
///
/// Runs on every transition into `connected`, before `SessionResolved` is
/// reported. A rejected resume clears the persisted room id and falls back
/// to the room list; a transport failure leaves the id in place for the next
/// reconnect.
async fn resume_session(
    conn: &Connection,
    shared: &Arc<SessionShared>,
    event_tx: &mpsc::Sender<EncoreEvent>,
) -> bool {
    let room_id = match shared.storage.last_room_id() {
        Ok(Some(room_id)) => room_id,
        Ok(None) => return false,
        Err(e) => {
            warn!("failed to read persisted room id: {e}");
            return false;
        }
    };
    let username = match shared.username() {
        Ok(username) => username,
        Err(_) => {
            // No name to resume under; treat like an invalid session.
            let _ = shared.storage.clear_last_room_id();
            return false;
        }
    };

    debug!(%room_id, "attempting session resume");
    let generation = shared.generation();
    match conn
        .request_as::<RoomStatePayload>(ClientRequest::ResumeSession { room_id, username })
        .await
    {
        Ok(payload) => match shared.apply_room_state(generation, payload) {
            Some(snapshot) => {
                emit(event_tx, EncoreEvent::RoomJoined { snapshot }).await;
                fetch_initial_page_for_pump(conn, shared, event_tx).await;
                true
            }
            None => false,
        },
        Err(EncoreError::Rejected { reason }) => {
            debug!("resume rejected ({reason}); falling back to room list");
            if let Err(e) = shared.storage.clear_last_room_id() {
                warn!("failed to clear persisted room id: {e}");
            }
            false
        }
        Err(e) => {
            // Transport-level failure: the room may still be valid; the next
            // reconnect retries with the same persisted id.
            debug!("resume attempt failed: {e}");
            false
        }
    }
}

async fn fetch_initial_page_for_pump(
    conn: &Connection,
    shared: &Arc<SessionShared>,
    event_tx: &mpsc::Sender<EncoreEvent>,
) {
    let Some((room_id, page)) = shared.state().playlist.begin_append() else {
        return;
    };
    let page_size = shared.state().playlist.page_size();
    match conn
        .request_as::<PlaylistPage>(ClientRequest::GetPlaylistPage {
            room_id,
            page,
            page_size,
        })
        .await
    {
        Ok(fetched) => {
            if shared.state().playlist.apply_page(room_id, fetched) {
                emit(event_tx, EncoreEvent::PlaylistPageLoaded).await;
            }
        }
        Err(e) => {
            shared.state().playlist.abort_fetch(room_id);
            debug!("initial playlist page fetch failed: {e}");
        }
    }
}

/// Apply one server push to the aggregate.
///
/// Pushes scoped to a room other than the currently tracked one are
/// discarded — in-flight events from a previous room may arrive after a room
/// switch and must not mutate current state.
async fn handle_push(
    conn: &Arc<Connection>,
    shared: &Arc<SessionShared>,
    event_tx: &mpsc::Sender<EncoreEvent>,
    msg: ServerMessage,
) {
    // Room-scope guard.
    if let Some(push_room) = msg.room_id() {
        let current = shared.state().room_id();
        if current != Some(push_room) {
            debug!(%push_room, "discarding push for a room the client is not in");
            return;
        }
    }

    match msg {
        ServerMessage::RoomsUpdated { rooms } => {
            shared.state().rooms = rooms.clone();
            emit(event_tx, EncoreEvent::RoomsUpdated { rooms }).await;
        }
        ServerMessage::Pong { server_now } => {
            shared.state().clock.sync(server_now);
        }
        ServerMessage::JoinedRoom { participant, .. } => {
            let update = {
                let mut state = shared.state();
                match state.room.as_mut() {
                    Some(room) => {
                        match room
                            .participants
                            .iter_mut()
                            .find(|p| p.client_id == participant.client_id)
                        {
                            Some(existing) => *existing = participant,
                            None => room.participants.push(participant),
                        }
                        Some((room.participants.clone(), room.room.host_client_id))
                    }
                    None => None,
                }
            };
            if let Some((participants, host_client_id)) = update {
                emit(
                    event_tx,
                    EncoreEvent::ParticipantsUpdated {
                        participants,
                        host_client_id,
                    },
                )
                .await;
            }
        }
        ServerMessage::ParticipantsUpdated {
            participants,
            host_client_id,
            ..
        } => {
            let update = {
                let mut state = shared.state();
                match state.room.as_mut() {
                    Some(room) => {
                        room.participants = dedup_participants(participants);
                        room.room.host_client_id = host_client_id;
                        Some((room.participants.clone(), host_client_id))
                    }
                    None => None,
                }
            };
            if let Some((participants, host_client_id)) = update {
                emit(
                    event_tx,
                    EncoreEvent::ParticipantsUpdated {
                        participants,
                        host_client_id,
                    },
                )
                .await;
            }
        }
        ServerMessage::UserLeft { client_id, .. } => {
            let update = {
                let mut state = shared.state();
                match state.room.as_mut() {
                    Some(room) => {
                        room.participants.retain(|p| p.client_id != client_id);
                        Some((room.participants.clone(), room.room.host_client_id))
                    }
                    None => None,
                }
            };
            if let Some((participants, host_client_id)) = update {
                emit(
                    event_tx,
                    EncoreEvent::ParticipantsUpdated {
                        participants,
                        host_client_id,
                    },
                )
                .await;
            }
        }
        ServerMessage::PlaylistProgress {
            upload_id,
            received_count,
            total_count,
            ready,
            ..
        } => {
            let changed = {
                let mut state = shared.state();
                let page_size = state.playlist.page_size();
                match state.transfer.as_mut() {
                    Some(transfer) => {
                        transfer.apply_progress(upload_id, received_count, total_count, ready)
                    }
                    None => {
                        let mut transfer =
                            PlaylistTransferState::new(upload_id, total_count, page_size);
                        transfer.apply_progress(upload_id, received_count, total_count, ready);
                        state.transfer = Some(transfer);
                        true
                    }
                }
            };
            if changed {
                emit(
                    event_tx,
                    EncoreEvent::PlaylistProgress {
                        upload_id,
                        received_count,
                        total_count,
                        ready,
                    },
                )
                .await;
            }
        }
        ServerMessage::PlaylistUpdated { room_id, .. } => {
            shared.state().playlist.reset(room_id);
            emit(event_tx, EncoreEvent::PlaylistChanged).await;
            fetch_initial_page_for_pump(conn, shared, event_tx).await;
        }
        ServerMessage::MessageAdded { message, .. } => {
            let appended = {
                let mut state = shared.state();
                match state.room.as_mut() {
                    Some(room) => {
                        // The ack for our own sendMessage returns the same
                        // message; only the push appends, and repeats are
                        // dropped by id.
                        if room.messages.iter().any(|m| m.id == message.id) {
                            false
                        } else {
                            room.messages.push(message.clone());
                            true
                        }
                    }
                    None => false,
                }
            };
            if appended {
                emit(event_tx, EncoreEvent::MessageAdded { message }).await;
            }
        }
        ServerMessage::GameStarted {
            game_state,
            server_now,
            ..
        } => {
            {
                let mut state = shared.state();
                state.clock.sync(server_now);
                if let Some(room) = state.room.as_mut() {
                    room.game_state = Some(*game_state);
                }
                state.view = SessionView::Game;
            }
            emit(event_tx, EncoreEvent::GameStarted).await;
            // Index-based track lookups need the full ordered playlist.
            if let Err(e) = fetch_complete_playlist(conn, shared).await {
                warn!("full playlist fetch for game view failed: {e}");
            }
        }
        ServerMessage::GameUpdated {
            game_state,
            server_now,
            ..
        } => {
            let ended_in_game_view = {
                let mut state = shared.state();
                state.clock.sync(server_now);
                let ended = game_state.is_ended();
                if let Some(room) = state.room.as_mut() {
                    room.game_state = Some(*game_state);
                }
                if ended && state.view == SessionView::Game {
                    // Local projection: the server never instructs this.
                    state.view = SessionView::Chat;
                    true
                } else {
                    false
                }
            };
            emit(event_tx, EncoreEvent::GameUpdated).await;
            if ended_in_game_view {
                emit(event_tx, EncoreEvent::ReturnedToChat).await;
            }
        }
        ServerMessage::Ack(ack) => {
            // Acks are resolved by the connection supervisor.
            debug!(id = %ack.id, "stray ack reached the session pump");
        }
    }
}

/// Fetch pages until the cache holds the complete playlist, used when the
/// game view needs index-based lookups over the full ordered list.
async fn fetch_complete_playlist(conn: &Connection, shared: &SessionShared) -> Result<usize> {
    loop {
        let next = shared.state().playlist.begin_append();
        let Some((room_id, page)) = next else {
            return Ok(shared.state().playlist.items().len());
        };
        let page_size = shared.state().playlist.page_size();
        let result: Result<PlaylistPage> = conn
            .request_as(ClientRequest::GetPlaylistPage {
                room_id,
                page,
                page_size,
            })
            .await;
        match result {
            Ok(fetched) => {
                let empty = fetched.items.is_empty();
                let applied = shared.state().playlist.apply_page(room_id, fetched);
                if !applied || empty {
                    return Ok(shared.state().playlist.items().len());
                }
            }
            Err(e) => {
                shared.state().playlist.abort_fetch(room_id);
                return Err(e);
            }
        }
    }
}

/// Emit a session event; drop it with a warning when the channel is full.
async fn emit(event_tx: &mpsc::Sender<EncoreEvent>, event: EncoreEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!(
                "session event channel full, dropping event: {:?}",
                std::mem::discriminant(&dropped)
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("session event channel closed, receiver dropped");
        }
    }
}
