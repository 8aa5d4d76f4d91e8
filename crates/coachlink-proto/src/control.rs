//! HTTP control-plane bodies.

use serde::{Deserialize, Serialize};

use crate::events::{SessionStatusKind, SessionStatusPayload};

/// Response of `GET status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Whether the gateway holds an active session.
    pub connected: bool,
    /// Pairing code currently on offer, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    /// Detailed status, when the gateway reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatusKind>,
    /// Whether a confirmation round is pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_confirmation: Option<bool>,
}

impl SessionSnapshot {
    /// Express an active snapshot as a session status.
    ///
    /// Returns `None` when the gateway holds no session. Gateways that report
    /// only the `connected` flag are treated as fully connected.
    #[must_use]
    pub fn as_session_status(&self) -> Option<SessionStatusPayload> {
        if !self.connected {
            return None;
        }
        Some(SessionStatusPayload {
            status: self.status.unwrap_or(SessionStatusKind::FullyConnected),
            requires_confirmation: self.requires_confirmation.unwrap_or(false),
            reason: None,
        })
    }
}

/// Body of `POST send`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    /// Normalized recipient.
    pub to: String,
    /// Message body.
    pub message: String,
}
