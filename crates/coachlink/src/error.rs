//! Error types for coachlink.

use thiserror::Error;

use crate::session::SessionState;

/// Crate-wide errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP control-plane failure.
    #[error("control plane error: {0}")]
    ControlPlane(#[from] ControlPlaneError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A wait ran out of time.
    #[error("timed out after {secs}s waiting for {what}")]
    Timeout {
        /// What was being waited for.
        what: String,
        /// Time waited.
        secs: u64,
    },

    /// The session event loop has stopped.
    #[error("session event loop closed")]
    Closed,
}

/// Failures establishing or holding the event channel.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The endpoint refused or failed the connection.
    #[error("connect to {endpoint} failed: {reason}")]
    Connect {
        /// Endpoint URL.
        endpoint: String,
        /// Underlying failure.
        reason: String,
    },

    /// The connection handshake did not finish in time.
    #[error("handshake with {endpoint} timed out after {secs}s")]
    HandshakeTimeout {
        /// Endpoint URL.
        endpoint: String,
        /// Timeout that elapsed.
        secs: u64,
    },

    /// The connection is closed.
    #[error("connection closed: {0}")]
    Closed(String),
}

/// Failures talking to the HTTP control plane.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlPlaneError {
    /// Request could not be sent or no response arrived.
    #[error("request to {path} failed: {reason}")]
    Request {
        /// Request path.
        path: String,
        /// Underlying failure.
        reason: String,
    },

    /// Non-success HTTP status.
    #[error("{path} returned HTTP {code}: {body}")]
    Status {
        /// Request path.
        path: String,
        /// HTTP status code.
        code: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// Response body could not be decoded.
    #[error("invalid response from {path}: {reason}")]
    Decode {
        /// Request path.
        path: String,
        /// Decoder error.
        reason: String,
    },
}

/// Rejections of an outbound message before anything is sent.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Recipient missing.
    #[error("recipient is required")]
    EmptyRecipient,

    /// Body missing.
    #[error("message body is required")]
    EmptyBody,

    /// Body longer than the gateway accepts.
    #[error("message body has {len} characters, maximum is {max}")]
    BodyTooLong {
        /// Actual length in characters.
        len: usize,
        /// Maximum length in characters.
        max: usize,
    },

    /// Recipient does not normalize to a plausible number.
    #[error("phone number must have 10 to 15 digits after normalization, got {digits}")]
    InvalidPhoneNumber {
        /// Digit count after normalization.
        digits: usize,
    },
}

/// Errors returned by [`crate::GatewayClient::send_message`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    /// The message was rejected locally.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The session is not fully connected.
    #[error("session not ready for sending (state: {state})")]
    NotConnected {
        /// State at the time of the attempt.
        state: SessionState,
    },

    /// The control plane refused or failed the send.
    #[error("delivery to gateway failed: {0}")]
    DeliverySendFailed(String),
}
