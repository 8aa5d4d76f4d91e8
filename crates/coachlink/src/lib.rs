//! `coachlink` - session connection manager for a messaging gateway.
//!
//! Maintains one long-lived session with a messaging gateway: an event
//! channel that reconnects on its own and fails over between endpoints, a
//! session state machine that walks the QR pairing and confirmation
//! handshake, a liveness monitor, and an HTTP control plane for status,
//! delivery and logout.
//!
//! ```no_run
//! use coachlink::{GatewayClient, GatewayConfig, SessionState};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GatewayConfig::new("http://localhost:3001", "ws://localhost:3001/events");
//! let client = GatewayClient::start(&config)?;
//! client.open()?;
//! client
//!     .wait_for_state(SessionState::FullyConnected, Duration::from_secs(120))
//!     .await?;
//! client.send_message("+54 9 11 2345-6789", "Training moved to 18:00").await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod control_plane;
pub mod error;
pub mod message;
pub mod monitor;
pub mod notify;
pub mod phone;
pub mod session;
pub mod transport;

pub use client::GatewayClient;
pub use config::GatewayConfig;
pub use control_plane::{ControlPlane, HttpControlPlane};
pub use error::{ControlPlaneError, GatewayError, SendError, TransportError, ValidationError};
pub use message::{OutboundMessage, MAX_BODY_CHARS};
pub use notify::{Notification, NotificationKind};
pub use phone::PhonePlan;
pub use session::{SessionState, SessionView};
pub use transport::{Connection, Connector, MemoryPeer, TransportEvent, WebSocketConnector};
