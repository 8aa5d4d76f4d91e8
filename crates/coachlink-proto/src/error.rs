//! Error types for the coachlink-proto crate.

use thiserror::Error;

/// Errors that can occur during protocol operations.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Failed to encode a frame.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Failed to decode a frame.
    #[error("decoding error: {0}")]
    Decoding(String),

    /// Event name not part of the gateway vocabulary.
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// Known event with a payload of the wrong shape.
    #[error("invalid payload for '{event}': {reason}")]
    InvalidPayload {
        /// Event name.
        event: String,
        /// What was wrong with it.
        reason: String,
    },
}
