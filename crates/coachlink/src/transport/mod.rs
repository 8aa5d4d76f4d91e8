//! Event-channel transport.
//!
//! Owns the single live connection to the gateway's event channel, including
//! automatic reconnection with exponential backoff and failover between a
//! primary and a secondary endpoint.

mod channel;
mod connector;
mod events;
mod policy;

pub use channel::{Endpoints, TransportChannel, TransportConfig};
pub use connector::{Connection, Connector, MemoryPeer, WebSocketConnector, WireEvent};
pub use events::{TransportEvent, TransportUpdate};
pub use policy::{EndpointSlot, FailureOutcome, ReconnectConfig, ReconnectPolicy};
