//! Transport event types.

use std::time::Duration;

use coachlink_proto::EventFrame;

/// Events emitted by the transport channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// First connection after `open()`.
    Connected {
        /// Endpoint that accepted the connection.
        endpoint: String,
    },
    /// Connection re-established after a drop.
    Reconnected {
        /// Endpoint that accepted the connection.
        endpoint: String,
        /// Attempts it took since the drop.
        attempt: u32,
    },
    /// A connection attempt failed.
    ConnectError {
        /// Endpoint that was tried.
        endpoint: String,
        /// Failure description.
        reason: String,
        /// Consecutive failures against this endpoint.
        attempt: u32,
    },
    /// The live connection dropped.
    Disconnected {
        /// Reason for disconnection.
        reason: String,
    },
    /// Waiting before the next attempt.
    Reconnecting {
        /// Endpoint the next attempt targets.
        endpoint: String,
        /// Attempt number within the current outage.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// An endpoint used up its attempt budget.
    EndpointExhausted {
        /// Endpoint that failed.
        endpoint: String,
        /// Consecutive failures against it.
        attempts: u32,
        /// Last failure description.
        last_error: String,
    },
    /// Application frame received from the gateway.
    Frame(EventFrame),
}

/// A transport event stamped with the channel generation it belongs to.
///
/// The generation advances on every `close()`, so events queued by a
/// connection that has since been torn down can be recognised and dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportUpdate {
    /// Channel generation at emission time.
    pub generation: u64,
    /// The event.
    pub event: TransportEvent,
}
