//! Error types for the Encore client.

use thiserror::Error;

/// Errors that can occur when using the Encore client.
#[derive(Debug, Error)]
pub enum EncoreError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted an operation that requires an active connection, but the
    /// client is not connected.
    #[error("not connected to server")]
    NotConnected,

    /// Attempted a room operation but the client is not in a room.
    #[error("not in a room")]
    NotInRoom,

    /// The server acknowledged the request with `ok: false`.
    ///
    /// Surfaced to the user as a transient status message; never retried
    /// automatically.
    #[error("request rejected: {reason}")]
    Rejected {
        /// Human-readable rejection reason from the server.
        reason: String,
    },

    /// Client-side validation failed before any request was sent.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// The connection dropped while a request was outstanding.
    ///
    /// The request must not be assumed to have failed server-side; its
    /// outcome is superseded by the next successful resume or rejoin.
    #[error("connection lost with request outstanding")]
    ConnectionLost,

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// The persistence layer failed to read or write a record.
    #[error("storage error: {0}")]
    Storage(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for Encore client operations.
pub type Result<T> = std::result::Result<T, EncoreError>;
