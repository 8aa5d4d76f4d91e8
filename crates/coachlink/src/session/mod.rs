//! Session lifecycle.
//!
//! [`machine`] holds the pure transition logic; [`driver`] runs it inside a
//! single task, executing effects against the transport, the control plane,
//! and the timers.

pub(crate) mod driver;
pub mod machine;
mod state;

pub use machine::{Effect, SessionInput, SessionMachine};
pub use state::{ConfirmationHandshake, SessionState, SessionView};
