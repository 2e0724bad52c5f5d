//! Session events delivered to the UI layer.

use crate::protocol::{
    ChatMessage, ClientId, Participant, RoomSummary, UploadId,
};
use crate::session::RoomSnapshot;

/// Events emitted by [`EncoreClient`](crate::EncoreClient) on its bounded
/// event channel.
///
/// Events describe state that has *already* been applied to the session
/// aggregate; consumers render from snapshots and use events as change
/// notifications. When the consumer lags, events other than
/// [`Disconnected`](EncoreEvent::Disconnected) may be dropped (a warning is
/// logged); `Disconnected` is always the last event delivered before the
/// channel idles or closes.
#[derive(Debug, Clone)]
pub enum EncoreEvent {
    /// The transport is up and the connection is authenticated.
    ///
    /// Fires before the session resume protocol runs; UI should keep showing
    /// a resolving state until [`SessionResolved`](EncoreEvent::SessionResolved).
    Connected,
    /// The transport dropped; an automatic reconnection attempt is pending.
    ///
    /// All room-scoped state has been cleared — the server is the sole
    /// source of truth for membership.
    Reconnecting { attempt: u32 },
    /// The connection is down for good (shutdown or retries exhausted).
    Disconnected { reason: Option<String> },
    /// The resume protocol finished; room state is resolved one way or the
    /// other and the UI may render.
    SessionResolved { resumed: bool },
    /// Lobby room list replaced wholesale.
    RoomsUpdated { rooms: Vec<RoomSummary> },
    /// The client is now in a room (fresh join, create, or resume).
    RoomJoined { snapshot: RoomSnapshot },
    /// The client left its room (or was disconnected from it).
    RoomLeft,
    /// Participant list replaced wholesale.
    ParticipantsUpdated {
        participants: Vec<Participant>,
        host_client_id: ClientId,
    },
    /// A chat message was appended.
    MessageAdded { message: ChatMessage },
    /// Server-side playlist ingestion progressed.
    PlaylistProgress {
        upload_id: UploadId,
        received_count: u32,
        total_count: u32,
        ready: bool,
    },
    /// The room playlist was replaced; the display cache was reset and
    /// page 1 refetched.
    PlaylistChanged,
    /// More playlist items arrived in the display cache.
    PlaylistPageLoaded,
    /// The game started.
    GameStarted,
    /// The game state changed (phase flip, next track, scores).
    GameUpdated,
    /// The game ended and the client returned to the chat view. This is a
    /// local projection, not a server instruction.
    ReturnedToChat,
}
