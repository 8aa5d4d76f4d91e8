//! Event-channel framing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProtoError;

/// A single text frame on the event channel.
///
/// Every frame is a JSON object naming the event and carrying an optional,
/// event-specific payload:
///
/// ```json
/// {"event": "loading_status", "payload": {"percent": 40, "message": "syncing"}}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventFrame {
    /// Event name.
    pub event: String,
    /// Event payload, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl EventFrame {
    /// Create a frame with a payload.
    #[must_use]
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload: Some(payload),
        }
    }

    /// Create a frame with no payload.
    #[must_use]
    pub fn bare(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            payload: None,
        }
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtoError> {
        serde_json::to_string(self).map_err(|e| ProtoError::Encoding(e.to_string()))
    }

    /// Deserialize from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON object with an `event` field.
    pub fn from_json(json: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(json).map_err(|e| ProtoError::Decoding(e.to_string()))
    }
}
