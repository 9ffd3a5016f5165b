//! Error types for bosswave-client.

use thiserror::Error;

/// Main error type for all client operations.
#[derive(Debug, Error)]
pub enum BosswaveError {
    /// I/O error on the router connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The router's first frame was not a HELLO acknowledgment.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Malformed data supplied by the caller at encode/construction time.
    #[error("format error: {0}")]
    Format(String),

    /// Malformed frame received from the router.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// The connection was closed.
    #[error("connection closed")]
    ConnectionClosed,
}

/// Result type alias using BosswaveError.
pub type Result<T> = std::result::Result<T, BosswaveError>;
