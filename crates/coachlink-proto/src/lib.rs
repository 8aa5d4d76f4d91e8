//! # coachlink-proto
//!
//! Protocol definitions for the messaging-gateway session client: the JSON
//! frames carried on the bidirectional event channel and the bodies of the
//! HTTP control plane.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod control;
pub mod error;
pub mod events;
pub mod frame;

pub use control::{SendRequest, SessionSnapshot};
pub use error::ProtoError;
pub use events::{ClientEvent, GatewayEvent, LoadingStatus, SessionStatusKind, SessionStatusPayload};
pub use frame::EventFrame;
