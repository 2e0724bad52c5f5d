//! # Basic Session Example
//!
//! Demonstrates a complete Encore client lifecycle:
//!
//! 1. Connect to a game server via WebSocket
//! 2. Resolve the session (resume a previous room, if any)
//! 3. Create a room with a small playlist
//! 4. React to session events (participants, chat, game phases)
//! 5. Shut down gracefully on Ctrl+C or disconnect
//!
//! ## Running
//!
//! ```sh
//! # Start an Encore server on localhost:4600, then:
//! cargo run --example basic_session
//!
//! # Override the server URL:
//! ENCORE_URL=ws://my-server:4600/ws cargo run --example basic_session
//! ```

use encore_client::protocol::PlaylistItem;
use encore_client::{
    CreateRoomParams, EncoreClient, EncoreConfig, EncoreEvent, JsonFileStore, WebSocketConnector,
};

/// Default server URL when `ENCORE_URL` is not set.
const DEFAULT_URL: &str = "ws://localhost:4600/ws";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let url = std::env::var("ENCORE_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    tracing::info!("Connecting to {url}");

    // Persist identity and the last-known room next to the binary so the
    // resume protocol works across runs.
    let store = JsonFileStore::open("encore-session.json")?;
    let connector = Box::new(WebSocketConnector::new(url));

    let (client, mut events) = EncoreClient::start(connector, store, EncoreConfig::new())?;
    client.set_display_name("RustPlayer")?;

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::info!("Event channel closed, exiting");
                    break;
                };

                match event {
                    EncoreEvent::Connected => {
                        tracing::info!("Connected, resolving session…");
                    }

                    EncoreEvent::SessionResolved { resumed } => {
                        if resumed {
                            tracing::info!("Resumed previous room");
                            continue;
                        }
                        tracing::info!("No session to resume; creating a room");
                        let playlist = demo_playlist();
                        let params = CreateRoomParams::new("rust demo room")
                            .with_question_count(5)
                            .with_playlist(playlist);
                        match client.create_room(params).await {
                            Ok(snapshot) => tracing::info!(
                                "Created room {} ({} in room)",
                                snapshot.room.name,
                                snapshot.participants.len()
                            ),
                            Err(e) => tracing::error!("create_room failed: {e}"),
                        }
                    }

                    EncoreEvent::RoomJoined { snapshot } => {
                        tracing::info!(
                            "In room {} with {} participant(s)",
                            snapshot.room.name,
                            snapshot.participants.len()
                        );
                    }

                    EncoreEvent::ParticipantsUpdated { participants, .. } => {
                        tracing::info!("Participants: {}", participants.len());
                    }

                    EncoreEvent::MessageAdded { message } => {
                        tracing::info!("<{}> {}", message.username, message.content);
                    }

                    EncoreEvent::PlaylistProgress { received_count, total_count, ready, .. } => {
                        tracing::info!("Playlist upload: {received_count}/{total_count} (ready={ready})");
                    }

                    EncoreEvent::GameStarted => {
                        if let Some(state) = client.snapshot().and_then(|s| s.game_state) {
                            if let Some(round) = state.round() {
                                let remaining = client.remaining_ms(round.guess_ends_at());
                                tracing::info!("Game on! {remaining}ms left to guess");
                            }
                        }
                    }

                    EncoreEvent::ReturnedToChat => {
                        tracing::info!("Game over, back to chat");
                    }

                    EncoreEvent::Reconnecting { attempt } => {
                        tracing::warn!("Connection lost, reconnect attempt {attempt}…");
                    }

                    EncoreEvent::Disconnected { reason } => {
                        tracing::warn!("Disconnected: {}", reason.as_deref().unwrap_or("unknown"));
                        break;
                    }

                    other => {
                        tracing::debug!("Event: {other:?}");
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down…");
                break;
            }
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────────
    client.shutdown().await;
    tracing::info!("Client shut down. Goodbye!");
    Ok(())
}

fn demo_playlist() -> Vec<PlaylistItem> {
    (1..=8)
        .map(|n| PlaylistItem {
            title: format!("Demo Track {n}"),
            url: format!("https://www.youtube.com/watch?v=demo{n:04}"),
            uploader: Some("Demo Channel".into()),
            duration_secs: Some(200),
            thumbnail: None,
        })
        .collect()
}
