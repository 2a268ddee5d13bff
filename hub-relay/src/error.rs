//! Error types for keyhub-relay.

use hub_types::FrameError;

/// Main error type for keyhub-relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Key directory error.
    #[error("key directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Key directory errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    /// User id or public key missing or empty.
    #[error("userId and publicKey required")]
    MissingField,
}

/// Relay protocol errors.
///
/// These never close a connection. The `Display` text is sent to the client
/// as the `message` of an `error` frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Frame could not be decoded.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// `identify` without a usable user id.
    #[error("userId required")]
    MissingUserId,

    /// `send` without a destination or payload.
    #[error("to and payload required")]
    MissingSendFields,

    /// `identify` on a connection that already has an identity.
    #[error("already identified")]
    AlreadyIdentified,

    /// Frame rejected by a rate limiter.
    #[error("rate limit exceeded")]
    RateLimited,
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for key directory operations.
pub type DirectoryResult<T> = std::result::Result<T, DirectoryError>;

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
