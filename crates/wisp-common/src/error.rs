//! Common error types for Wisp.

use thiserror::Error;

/// Result type alias using Wisp's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for Wisp operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (socket, stdin, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error, raised before any network activity
    #[error("configuration error: {0}")]
    Config(String),

    /// Cryptographic operation failed
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Protocol error
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Underlying duplex channel failed
    #[error("transport error: {0}")]
    Transport(String),
}

impl Error {
    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    /// Create a crypto error from any displayable type.
    pub fn crypto(msg: impl std::fmt::Display) -> Self {
        Self::Crypto(msg.to_string())
    }

    /// Create a protocol error from any displayable type.
    pub fn protocol(msg: impl std::fmt::Display) -> Self {
        Self::Protocol(msg.to_string())
    }

    /// Create a transport error from any displayable type.
    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }

    /// Whether the error was raised by configuration, before any I/O.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
