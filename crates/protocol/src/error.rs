//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering payload decoding and early disconnects.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to deserialize data.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// The credential payload decoded but is unusable.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// A control frame did not carry a resize record.
    #[error("invalid control message: {0}")]
    InvalidControl(String),

    /// Connection was closed unexpectedly.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Deserialization(err.to_string())
    }
}
