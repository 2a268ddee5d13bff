//! Error types for keyhub frame decoding.

use thiserror::Error;

/// Errors that can occur while decoding an inbound relay frame.
///
/// The `Display` text of each variant is what the relay reports back to the
/// client in an `error` frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The frame is not well-formed JSON
    #[error("invalid JSON")]
    InvalidJson,

    /// The `type` field is missing, not a string, or not a known frame type
    #[error("unknown message type")]
    UnknownType,
}
