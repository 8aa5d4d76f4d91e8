//! Session state types.

use std::fmt;

use serde::Serialize;
use tokio::time::Instant;

/// Lifecycle state of the messaging session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// `open()` has not been called.
    #[default]
    NotInitialized,
    /// Event channel connecting, or connected and probing the gateway.
    Connecting,
    /// A pairing code is on offer.
    AwaitingQr,
    /// Paired; the gateway waits for `connection_confirmed`.
    AwaitingConfirmation,
    /// Paired, not yet ready to send.
    Connected,
    /// Ready to send.
    FullyConnected,
    /// Channel or session lost.
    Disconnected,
    /// Gateway rejected pairing. Only an explicit reconnect recovers.
    AuthFailure,
}

impl SessionState {
    /// Wire-style name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotInitialized => "not_initialized",
            Self::Connecting => "connecting",
            Self::AwaitingQr => "awaiting_qr",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::Connected => "connected",
            Self::FullyConnected => "fully_connected",
            Self::Disconnected => "disconnected",
            Self::AuthFailure => "auth_failure",
        }
    }

    /// States in which the event channel is expected to be up.
    #[must_use]
    pub const fn is_connected_family(self) -> bool {
        matches!(
            self,
            Self::AwaitingQr | Self::AwaitingConfirmation | Self::Connected | Self::FullyConnected
        )
    }

    /// Whether outbound messages may be sent.
    #[must_use]
    pub const fn accepts_sends(self) -> bool {
        matches!(self, Self::FullyConnected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outstanding `connection_confirmed` round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationHandshake {
    /// When the gateway is given up on.
    pub deadline: Instant,
}

/// Snapshot of the session published to observers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionView {
    /// Current state.
    pub state: SessionState,
    /// Pairing code on offer, if any.
    pub pending_qr: Option<String>,
    /// Whether a confirmation round is outstanding.
    pub awaiting_confirmation: bool,
}
