//! # Encore Client
//!
//! Transport-agnostic Rust client synchronizer for the Encore multiplayer
//! guess-the-song party game.
//!
//! The crate owns the live connection to the authoritative game server and
//! keeps the local room/game aggregate consistent with it: server pushes and
//! acknowledged requests are the only sources of mutation, sessions are
//! resumed across reconnects, playlists stream in bounded chunks, and all
//! countdowns are rendered against the server clock.
//!
//! ## Features
//!
//! - **Transport-agnostic** — implement the [`Transport`] and [`Connector`]
//!   traits for any backend
//! - **WebSocket built-in** — the default `transport-websocket` feature
//!   provides [`WebSocketTransport`]
//! - **Event-driven** — receive typed [`EncoreEvent`]s via a channel and
//!   read state through cheap snapshots
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! let connector = Box::new(WebSocketConnector::new("ws://localhost:4600/ws"));
//! let config = EncoreConfig::new();
//! let (client, mut events) = EncoreClient::start(connector, MemoryStore::new(), config)?;
//!
//! client.set_display_name("Alice")?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         EncoreEvent::SessionResolved { resumed } => { /* render */ }
//!         EncoreEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

pub mod clock;
pub mod connection;
pub mod error;
pub mod event;
pub mod playlist;
pub mod protocol;
pub mod session;
pub mod store;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use clock::ServerClock;
pub use connection::{ConnEvent, Connection, EncoreConfig};
pub use error::EncoreError;
pub use event::EncoreEvent;
pub use playlist::{PlaylistSource, PlaylistTransferState, PlaylistView};
pub use protocol::{ClientRequest, ServerMessage};
pub use session::{CreateRoomParams, EncoreClient, RoomSnapshot, SessionView};
pub use store::{ClientIdentity, JsonFileStore, MemoryStore, SessionStore};
pub use transport::{Connector, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
