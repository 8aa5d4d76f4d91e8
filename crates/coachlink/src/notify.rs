//! Notifications for listeners.
//!
//! The client fans out a closed set of notifications over a broadcast
//! channel. Each call to [`Notifier::subscribe`] returns an independent
//! receiver; dropping it unregisters the listener.

use chrono::{DateTime, Utc};
use coachlink_proto::{LoadingStatus, SessionStatusPayload};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

const DEFAULT_CAPACITY: usize = 64;

/// A delivered message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageReceipt {
    /// Normalized recipient, when known.
    pub to: Option<String>,
    /// Message body, when known.
    pub message: Option<String>,
    /// When the receipt was produced.
    pub timestamp: DateTime<Utc>,
    /// Gateway-supplied details.
    pub details: Value,
}

/// A failed delivery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageFailure {
    /// Recipient, when known.
    pub to: Option<String>,
    /// Failure description.
    pub error: String,
    /// When the failure was observed.
    pub timestamp: DateTime<Utc>,
    /// Gateway-supplied details.
    pub details: Value,
}

impl MessageReceipt {
    /// Receipt for a message this client sent.
    #[must_use]
    pub fn sent(to: &str, message: &str) -> Self {
        Self {
            to: Some(to.to_string()),
            message: Some(message.to_string()),
            timestamp: Utc::now(),
            details: Value::Null,
        }
    }

    /// Receipt pushed by the gateway.
    #[must_use]
    pub fn from_gateway(details: Value) -> Self {
        Self {
            to: string_field(&details, "to"),
            message: string_field(&details, "message"),
            timestamp: Utc::now(),
            details,
        }
    }
}

impl MessageFailure {
    /// Failure of a message this client tried to send.
    #[must_use]
    pub fn send_failed(to: &str, error: impl Into<String>) -> Self {
        Self {
            to: Some(to.to_string()),
            error: error.into(),
            timestamp: Utc::now(),
            details: Value::Null,
        }
    }

    /// Failure pushed by the gateway.
    #[must_use]
    pub fn from_gateway(details: Value) -> Self {
        let error = details
            .as_str()
            .map(str::to_string)
            .or_else(|| string_field(&details, "error"))
            .or_else(|| string_field(&details, "message"))
            .unwrap_or_else(|| "gateway reported a delivery error".to_string());
        Self {
            to: string_field(&details, "to"),
            error,
            timestamp: Utc::now(),
            details,
        }
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Everything a listener can be told.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Notification {
    /// A pairing code is on offer.
    Qr {
        /// Opaque pairing code.
        code: String,
    },
    /// The gateway reported a session status.
    SessionStatus(SessionStatusPayload),
    /// The session became ready, or stopped being ready.
    ConnectionStatus {
        /// Whether the session is ready to send.
        connected: bool,
        /// Why it stopped, when it did.
        reason: Option<String>,
    },
    /// A message was delivered.
    MessageSent(MessageReceipt),
    /// A message failed.
    MessageError(MessageFailure),
    /// Session loading progress.
    LoadingStatus(LoadingStatus),
    /// An event-channel endpoint exhausted its retry budget.
    ConnectionError {
        /// Endpoint that failed.
        endpoint: String,
        /// Consecutive failed attempts.
        attempts: u32,
        /// Last failure description.
        message: String,
    },
}

/// Discriminant of [`Notification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// [`Notification::Qr`].
    Qr,
    /// [`Notification::SessionStatus`].
    SessionStatus,
    /// [`Notification::ConnectionStatus`].
    ConnectionStatus,
    /// [`Notification::MessageSent`].
    MessageSent,
    /// [`Notification::MessageError`].
    MessageError,
    /// [`Notification::LoadingStatus`].
    LoadingStatus,
    /// [`Notification::ConnectionError`].
    ConnectionError,
}

impl NotificationKind {
    /// Listener-facing name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Qr => "qr",
            Self::SessionStatus => "session_status",
            Self::ConnectionStatus => "connection_status",
            Self::MessageSent => "message_sent",
            Self::MessageError => "message_error",
            Self::LoadingStatus => "loading_status",
            Self::ConnectionError => "connection_error",
        }
    }
}

impl Notification {
    /// Which kind of notification this is.
    #[must_use]
    pub const fn kind(&self) -> NotificationKind {
        match self {
            Self::Qr { .. } => NotificationKind::Qr,
            Self::SessionStatus(_) => NotificationKind::SessionStatus,
            Self::ConnectionStatus { .. } => NotificationKind::ConnectionStatus,
            Self::MessageSent(_) => NotificationKind::MessageSent,
            Self::MessageError(_) => NotificationKind::MessageError,
            Self::LoadingStatus(_) => NotificationKind::LoadingStatus,
            Self::ConnectionError { .. } => NotificationKind::ConnectionError,
        }
    }
}

/// Broadcasts notifications to any number of listeners.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Notifier {
    /// Create a notifier buffering up to `capacity` notifications per
    /// listener.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Register a listener.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Deliver to every listener. Having no listeners is not an error.
    pub fn notify(&self, notification: Notification) {
        trace!(kind = notification.kind().as_str(), "notify");
        let _ = self.tx.send(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coachlink_proto::SessionStatusKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_every_listener_receives() {
        let notifier = Notifier::default();
        let mut a = notifier.subscribe();
        let mut b = notifier.subscribe();

        notifier.notify(Notification::Qr {
            code: "abc".to_string(),
        });

        assert_eq!(a.recv().await.unwrap().kind(), NotificationKind::Qr);
        assert_eq!(b.recv().await.unwrap().kind(), NotificationKind::Qr);
    }

    #[test]
    fn test_dropping_receiver_unsubscribes() {
        let notifier = Notifier::default();
        let rx = notifier.subscribe();
        assert_eq!(notifier.listener_count(), 1);
        drop(rx);
        assert_eq!(notifier.listener_count(), 0);
        notifier.notify(Notification::ConnectionStatus {
            connected: false,
            reason: None,
        });
    }

    #[test]
    fn test_gateway_receipt_fields() {
        let receipt = MessageReceipt::from_gateway(json!({"to": "549111", "message": "hi"}));
        assert_eq!(receipt.to.as_deref(), Some("549111"));
        assert_eq!(receipt.message.as_deref(), Some("hi"));
    }

    #[test]
    fn test_gateway_failure_message() {
        assert_eq!(MessageFailure::from_gateway(json!("boom")).error, "boom");
        assert_eq!(
            MessageFailure::from_gateway(json!({"error": "rate limited"})).error,
            "rate limited"
        );
        assert_eq!(
            MessageFailure::from_gateway(json!({})).error,
            "gateway reported a delivery error"
        );
    }

    #[test]
    fn test_kind_names() {
        let n = Notification::SessionStatus(SessionStatusPayload::new(
            SessionStatusKind::FullyConnected,
        ));
        assert_eq!(n.kind().as_str(), "session_status");
        let n = Notification::ConnectionError {
            endpoint: "ws://a".to_string(),
            attempts: 5,
            message: "refused".to_string(),
        };
        assert_eq!(n.kind().as_str(), "connection_error");
    }

    #[test]
    fn test_serializes_tagged() {
        let n = Notification::ConnectionStatus {
            connected: true,
            reason: None,
        };
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["kind"], "connection_status");
        assert_eq!(value["data"]["connected"], true);
    }
}
