//! Transport abstraction for the Encore session protocol.
//!
//! The [`Transport`] trait defines a bidirectional text message channel
//! between the client and the game server. The protocol uses JSON text
//! messages, so every transport implementation must handle message framing
//! internally (WebSocket frames, length-prefixed TCP, QUIC streams, …).
//!
//! Connection setup is intentionally NOT part of this trait — different
//! transports have fundamentally different connection parameters. The
//! [`Connector`] companion trait packages "how to (re)establish a
//! connection" so the connection manager can reconnect with backoff without
//! knowing transport specifics.

use async_trait::async_trait;

use crate::error::Result;

/// A bidirectional text message transport for the Encore session protocol.
///
/// Implementors shuttle serialized JSON strings between the client and
/// server. Each call to [`send`](Transport::send) transmits one complete JSON
/// message; each call to [`recv`](Transport::recv) returns one.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because it is
/// used inside `tokio::select!`. If `recv` is cancelled before completion,
/// calling it again must not lose data. Channel-based implementations are
/// naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text message to the server.
    ///
    /// # Errors
    ///
    /// Returns [`EncoreError::TransportSend`](crate::error::EncoreError::TransportSend)
    /// if the message could not be sent (connection broken, write buffer full, …).
    async fn send(&mut self, message: String) -> Result<()>;

    /// Receive the next JSON text message from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))` — a complete message was received
    /// - `Some(Err(e))` — a transport error occurred
    /// - `None` — the connection was closed cleanly by the server
    async fn recv(&mut self) -> Option<Result<String>>;

    /// Close the transport connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations
    /// should still release resources even if the close handshake fails.
    async fn close(&mut self) -> Result<()>;
}

/// Factory for (re)establishing a [`Transport`].
///
/// The connection manager owns a `Connector` and calls it on initial connect
/// and on every reconnection attempt, so backoff and session resume stay
/// transport-agnostic.
#[async_trait]
pub trait Connector: Send + 'static {
    /// Establish a fresh connection to the server.
    async fn connect(&mut self) -> Result<Box<dyn Transport>>;
}

#[async_trait]
impl Transport for Box<dyn Transport> {
    async fn send(&mut self, message: String) -> Result<()> {
        (**self).send(message).await
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        (**self).recv().await
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }
}
