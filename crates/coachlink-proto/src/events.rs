//! Application events carried on the event channel.
//!
//! Transport-level happenings (connect, disconnect, reconnect) are not part of
//! this vocabulary; they are produced locally by the transport channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{EventFrame, ProtoError};

/// Session status reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatusKind {
    /// Paired, possibly still needing a confirmation round.
    Connected,
    /// Paired and ready to send.
    FullyConnected,
    /// Session gone.
    Disconnected,
    /// Pairing or authentication rejected by the gateway.
    AuthFailure,
}

/// Payload of a `session_status` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusPayload {
    /// Reported status.
    pub status: SessionStatusKind,
    /// Whether the gateway wants a `connection_confirmed` acknowledgement.
    #[serde(default)]
    pub requires_confirmation: bool,
    /// Optional human-readable reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SessionStatusPayload {
    /// Create a payload with no confirmation requirement and no reason.
    #[must_use]
    pub const fn new(status: SessionStatusKind) -> Self {
        Self {
            status,
            requires_confirmation: false,
            reason: None,
        }
    }

    /// Mark the payload as requiring confirmation.
    #[must_use]
    pub const fn requiring_confirmation(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }

    /// Attach a reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Decode from a raw JSON payload.
    ///
    /// Older gateways push a bare boolean; `true` maps to `fully_connected`
    /// and `false` to `disconnected`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is neither a boolean nor a status object.
    pub fn from_value(value: Value) -> Result<Self, ProtoError> {
        match value {
            Value::Bool(true) => Ok(Self::new(SessionStatusKind::FullyConnected)),
            Value::Bool(false) => Ok(Self::new(SessionStatusKind::Disconnected)),
            other => serde_json::from_value(other).map_err(|e| ProtoError::InvalidPayload {
                event: GatewayEvent::SESSION_STATUS.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// Payload of a `loading_status` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadingStatus {
    /// Progress, nominally 0..=100. Gateways send integers, fractions, or
    /// numeric strings.
    #[serde(deserialize_with = "lenient_percent")]
    pub percent: f32,
    /// Progress message.
    #[serde(default)]
    pub message: String,
}

fn lenient_percent<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_f64()
            .map(|p| p as f32)
            .ok_or_else(|| D::Error::custom("percent out of range")),
        Value::String(s) => s
            .trim()
            .trim_end_matches('%')
            .parse::<f32>()
            .map_err(|e| D::Error::custom(format!("invalid percent {s:?}: {e}"))),
        other => Err(D::Error::custom(format!("expected a number, got {other}"))),
    }
}

/// Events pushed by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// New pairing code (opaque string, usually a data URL).
    Qr(String),
    /// Session status change.
    SessionStatus(SessionStatusPayload),
    /// Session loading progress.
    LoadingStatus(LoadingStatus),
    /// Gateway-side delivery report.
    MessageSent(Value),
    /// Gateway-side delivery failure.
    MessageError(Value),
}

impl GatewayEvent {
    /// Event name for QR codes.
    pub const QR: &'static str = "qr";
    /// Event name for session status.
    pub const SESSION_STATUS: &'static str = "session_status";
    /// Event name for loading progress.
    pub const LOADING_STATUS: &'static str = "loading_status";
    /// Event name for delivery reports.
    pub const MESSAGE_SENT: &'static str = "message_sent";
    /// Event name for delivery failures.
    pub const MESSAGE_ERROR: &'static str = "message_error";

    /// Wire name of this event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Qr(_) => Self::QR,
            Self::SessionStatus(_) => Self::SESSION_STATUS,
            Self::LoadingStatus(_) => Self::LOADING_STATUS,
            Self::MessageSent(_) => Self::MESSAGE_SENT,
            Self::MessageError(_) => Self::MESSAGE_ERROR,
        }
    }

    /// Decode an inbound frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::UnknownEvent`] for names outside the vocabulary and
    /// [`ProtoError::InvalidPayload`] when the payload has the wrong shape.
    pub fn from_frame(frame: EventFrame) -> Result<Self, ProtoError> {
        let EventFrame { event, payload } = frame;
        let payload = payload.unwrap_or(Value::Null);
        let invalid = |reason: &str| ProtoError::InvalidPayload {
            event: event.clone(),
            reason: reason.to_string(),
        };

        match event.as_str() {
            Self::QR => match payload {
                Value::String(code) if !code.is_empty() => Ok(Self::Qr(code)),
                _ => Err(invalid("expected a non-empty string")),
            },
            Self::SESSION_STATUS => SessionStatusPayload::from_value(payload).map(Self::SessionStatus),
            Self::LOADING_STATUS => serde_json::from_value(payload)
                .map(Self::LoadingStatus)
                .map_err(|e| invalid(&e.to_string())),
            Self::MESSAGE_SENT => Ok(Self::MessageSent(payload)),
            Self::MESSAGE_ERROR => Ok(Self::MessageError(payload)),
            _ => Err(ProtoError::UnknownEvent(event)),
        }
    }

    /// Encode as a frame (gateway side; used by mock gateways).
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn to_frame(&self) -> Result<EventFrame, ProtoError> {
        let payload = match self {
            Self::Qr(code) => Value::String(code.clone()),
            Self::SessionStatus(status) => {
                serde_json::to_value(status).map_err(|e| ProtoError::Encoding(e.to_string()))?
            }
            Self::LoadingStatus(loading) => {
                serde_json::to_value(loading).map_err(|e| ProtoError::Encoding(e.to_string()))?
            }
            Self::MessageSent(data) | Self::MessageError(data) => data.clone(),
        };
        Ok(EventFrame::new(self.name(), payload))
    }
}

/// Events sent by the client to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientEvent {
    /// Ask the gateway for a fresh pairing code.
    RequestQr,
    /// Acknowledge a `requiresConfirmation` session status.
    ConnectionConfirmed,
}

impl ClientEvent {
    /// Wire name of this event.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::RequestQr => "request_qr",
            Self::ConnectionConfirmed => "connection_confirmed",
        }
    }

    /// Encode as a frame.
    #[must_use]
    pub fn to_frame(self) -> EventFrame {
        EventFrame::bare(self.name())
    }

    /// Decode a frame sent by a client (gateway side; used by mock gateways).
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::UnknownEvent`] for any other event name.
    pub fn from_frame(frame: &EventFrame) -> Result<Self, ProtoError> {
        match frame.event.as_str() {
            "request_qr" => Ok(Self::RequestQr),
            "connection_confirmed" => Ok(Self::ConnectionConfirmed),
            other => Err(ProtoError::UnknownEvent(other.to_string())),
        }
    }
}
