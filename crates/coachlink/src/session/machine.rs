//! The session state machine.
//!
//! [`SessionMachine::apply`] is a pure transition function: it takes one
//! input, updates the machine and returns the side effects the driver must
//! perform. It never touches the network or a timer directly, which keeps
//! every ordering question testable without a runtime.

use std::time::Duration;

use coachlink_proto::{
    ClientEvent, EventFrame, GatewayEvent, SessionSnapshot, SessionStatusKind,
    SessionStatusPayload,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::notify::{MessageFailure, MessageReceipt, Notification};
use crate::transport::TransportEvent;

use super::state::{ConfirmationHandshake, SessionState, SessionView};

/// Something that happened to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    /// Caller asked to start.
    Open,
    /// Caller asked for a clean reconnect.
    Reconnect,
    /// Caller asked to drop the session and log out.
    ForceDisconnect,
    /// Logout after a forced disconnect finished.
    LogoutFinished,
    /// Something happened on the event channel.
    Transport(TransportEvent),
    /// An already-decoded gateway event.
    Gateway(GatewayEvent),
    /// Status probe answered.
    StatusProbe(SessionSnapshot),
    /// Status probe failed.
    StatusProbeFailed(String),
    /// The confirmation round timed out.
    ConfirmationDeadline,
}

/// Side effects requested by the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Start the event channel.
    OpenTransport,
    /// Stop the event channel and cancel its timers.
    CloseTransport,
    /// Send an event to the gateway.
    Emit(ClientEvent),
    /// Ask the control plane for the session status.
    QueryStatus,
    /// Ask the control plane to log the session out.
    Logout,
    /// Start (or restart) the confirmation timer.
    StartConfirmationTimer(Duration),
    /// Cancel the confirmation timer.
    CancelConfirmationTimer,
    /// Start the liveness monitor.
    ArmMonitor,
    /// Stop the liveness monitor.
    DisarmMonitor,
    /// Tell listeners.
    Notify(Notification),
}

/// Session state plus the data tied to it.
#[derive(Debug)]
pub struct SessionMachine {
    state: SessionState,
    pending_qr: Option<String>,
    handshake: Option<ConfirmationHandshake>,
    auth_latched: bool,
    confirmation_timeout: Duration,
}

impl SessionMachine {
    /// Create a machine in [`SessionState::NotInitialized`].
    #[must_use]
    pub const fn new(confirmation_timeout: Duration) -> Self {
        Self {
            state: SessionState::NotInitialized,
            pending_qr: None,
            handshake: None,
            auth_latched: false,
            confirmation_timeout,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Pairing code on offer.
    #[must_use]
    pub fn pending_qr(&self) -> Option<&str> {
        self.pending_qr.as_deref()
    }

    /// Outstanding confirmation round.
    #[must_use]
    pub const fn handshake(&self) -> Option<ConfirmationHandshake> {
        self.handshake
    }

    /// Whether an authentication failure is blocking automatic recovery.
    #[must_use]
    pub const fn auth_latched(&self) -> bool {
        self.auth_latched
    }

    /// Snapshot for observers.
    #[must_use]
    pub fn view(&self) -> SessionView {
        SessionView {
            state: self.state,
            pending_qr: self.pending_qr.clone(),
            awaiting_confirmation: self.handshake.is_some(),
        }
    }

    /// Apply one input and return the effects to perform, in order.
    pub fn apply(&mut self, input: SessionInput) -> Vec<Effect> {
        let mut effects = Vec::new();
        match input {
            SessionInput::Open => self.on_open(&mut effects),
            SessionInput::Reconnect => self.on_reconnect(&mut effects),
            SessionInput::ForceDisconnect => self.on_force_disconnect(&mut effects),
            SessionInput::LogoutFinished => self.on_logout_finished(&mut effects),
            SessionInput::Transport(event) => self.on_transport(event, &mut effects),
            SessionInput::Gateway(event) => self.on_gateway(event, &mut effects),
            SessionInput::StatusProbe(snapshot) => self.on_probe(&snapshot, &mut effects),
            SessionInput::StatusProbeFailed(reason) => {
                warn!(error = %reason, "status probe failed");
            }
            SessionInput::ConfirmationDeadline => self.on_confirmation_deadline(&mut effects),
        }
        effects
    }

    fn transition(&mut self, next: SessionState, cause: &str) {
        if self.state != next {
            info!(from = %self.state, to = %next, cause, "session state change");
            self.state = next;
        }
    }

    /// Drop the pairing code and any confirmation round.
    fn clear_session_data(&mut self, effects: &mut Vec<Effect>) {
        self.pending_qr = None;
        if self.handshake.take().is_some() {
            effects.push(Effect::CancelConfirmationTimer);
        }
    }

    fn on_open(&mut self, effects: &mut Vec<Effect>) {
        if self.state != SessionState::NotInitialized {
            debug!(state = %self.state, "open ignored; session already started");
            return;
        }
        self.transition(SessionState::Connecting, "open");
        effects.push(Effect::OpenTransport);
    }

    fn on_reconnect(&mut self, effects: &mut Vec<Effect>) {
        self.clear_session_data(effects);
        self.auth_latched = false;
        self.transition(SessionState::Connecting, "reconnect requested");
        effects.extend([
            Effect::DisarmMonitor,
            Effect::CloseTransport,
            Effect::OpenTransport,
        ]);
    }

    fn on_force_disconnect(&mut self, effects: &mut Vec<Effect>) {
        self.clear_session_data(effects);
        self.auth_latched = false;
        self.transition(SessionState::Disconnected, "forced disconnect");
        effects.extend([
            Effect::DisarmMonitor,
            Effect::CloseTransport,
            Effect::Notify(Notification::ConnectionStatus {
                connected: false,
                reason: Some("forced disconnect".to_string()),
            }),
            Effect::Logout,
        ]);
    }

    fn on_logout_finished(&mut self, effects: &mut Vec<Effect>) {
        if self.state != SessionState::Disconnected {
            debug!(state = %self.state, "session moved on during logout; not reopening");
            return;
        }
        self.transition(SessionState::Connecting, "logout finished");
        effects.push(Effect::OpenTransport);
    }

    fn on_transport(&mut self, event: TransportEvent, effects: &mut Vec<Effect>) {
        match event {
            TransportEvent::Connected { endpoint } | TransportEvent::Reconnected { endpoint, .. } => {
                effects.push(Effect::ArmMonitor);
                if self.auth_latched {
                    info!(endpoint = %endpoint, "channel up; authentication failure needs an explicit reconnect");
                    return;
                }
                self.transition(SessionState::Connecting, "channel connected");
                effects.push(Effect::QueryStatus);
            }
            TransportEvent::Disconnected { reason } => {
                if self.state == SessionState::NotInitialized {
                    return;
                }
                self.clear_session_data(effects);
                self.transition(SessionState::Disconnected, "channel lost");
                effects.extend([
                    Effect::DisarmMonitor,
                    Effect::Notify(Notification::ConnectionStatus {
                        connected: false,
                        reason: Some(reason),
                    }),
                ]);
            }
            TransportEvent::EndpointExhausted {
                endpoint,
                attempts,
                last_error,
            } => effects.push(Effect::Notify(Notification::ConnectionError {
                endpoint,
                attempts,
                message: last_error,
            })),
            TransportEvent::ConnectError { .. } | TransportEvent::Reconnecting { .. } => {}
            TransportEvent::Frame(frame) => self.on_frame(frame, effects),
        }
    }

    fn on_frame(&mut self, frame: EventFrame, effects: &mut Vec<Effect>) {
        let name = frame.event.clone();
        match GatewayEvent::from_frame(frame) {
            Ok(event) => self.on_gateway(event, effects),
            Err(e) => warn!(event = %name, error = %e, "ignoring malformed gateway event"),
        }
    }

    fn on_gateway(&mut self, event: GatewayEvent, effects: &mut Vec<Effect>) {
        match event {
            GatewayEvent::Qr(code) => self.on_qr(code, effects),
            GatewayEvent::SessionStatus(payload) => {
                effects.push(Effect::Notify(Notification::SessionStatus(payload.clone())));
                self.on_session_status(payload, effects);
            }
            GatewayEvent::LoadingStatus(status) => {
                effects.push(Effect::Notify(Notification::LoadingStatus(status)));
            }
            GatewayEvent::MessageSent(details) => effects.push(Effect::Notify(
                Notification::MessageSent(MessageReceipt::from_gateway(details)),
            )),
            GatewayEvent::MessageError(details) => effects.push(Effect::Notify(
                Notification::MessageError(MessageFailure::from_gateway(details)),
            )),
        }
    }

    fn on_qr(&mut self, code: String, effects: &mut Vec<Effect>) {
        match self.state {
            SessionState::NotInitialized | SessionState::AuthFailure => {
                debug!(state = %self.state, "ignoring pairing code");
                return;
            }
            SessionState::FullyConnected => {
                warn!("gateway issued a new pairing code; session is no longer ready");
            }
            _ => {}
        }
        // A new pairing round supersedes any pending confirmation.
        if self.handshake.take().is_some() {
            effects.push(Effect::CancelConfirmationTimer);
        }
        self.transition(SessionState::AwaitingQr, "pairing code received");
        self.pending_qr = Some(code.clone());
        effects.push(Effect::Notify(Notification::Qr { code }));
    }

    fn on_session_status(&mut self, payload: SessionStatusPayload, effects: &mut Vec<Effect>) {
        match payload.status {
            SessionStatusKind::Connected if payload.requires_confirmation => {
                if self.handshake.is_some() {
                    debug!("confirmation already outstanding");
                    return;
                }
                self.auth_latched = false;
                self.transition(SessionState::AwaitingConfirmation, "confirmation requested");
                self.handshake = Some(ConfirmationHandshake {
                    deadline: Instant::now() + self.confirmation_timeout,
                });
                effects.extend([
                    Effect::Emit(ClientEvent::ConnectionConfirmed),
                    Effect::StartConfirmationTimer(self.confirmation_timeout),
                ]);
            }
            SessionStatusKind::Connected => {
                if self.handshake.take().is_some() {
                    effects.push(Effect::CancelConfirmationTimer);
                }
                self.auth_latched = false;
                self.transition(SessionState::Connected, "session paired");
            }
            SessionStatusKind::FullyConnected => {
                let already = self.state == SessionState::FullyConnected;
                self.clear_session_data(effects);
                self.auth_latched = false;
                self.transition(SessionState::FullyConnected, "session ready");
                if !already {
                    effects.push(Effect::Notify(Notification::ConnectionStatus {
                        connected: true,
                        reason: None,
                    }));
                }
            }
            SessionStatusKind::Disconnected => {
                self.clear_session_data(effects);
                self.transition(SessionState::Disconnected, "gateway reported disconnect");
                effects.push(Effect::Notify(Notification::ConnectionStatus {
                    connected: false,
                    reason: Some(
                        payload
                            .reason
                            .unwrap_or_else(|| "session disconnected".to_string()),
                    ),
                }));
            }
            SessionStatusKind::AuthFailure => {
                self.clear_session_data(effects);
                self.auth_latched = true;
                self.transition(SessionState::AuthFailure, "gateway rejected authentication");
                effects.push(Effect::Notify(Notification::ConnectionStatus {
                    connected: false,
                    reason: Some(
                        payload
                            .reason
                            .unwrap_or_else(|| "authentication failure".to_string()),
                    ),
                }));
            }
        }
    }

    fn on_probe(&mut self, snapshot: &SessionSnapshot, effects: &mut Vec<Effect>) {
        if self.state != SessionState::Connecting {
            debug!(state = %self.state, "status probe answered after state moved on; ignoring");
            return;
        }
        if let Some(status) = snapshot.as_session_status() {
            self.on_gateway(GatewayEvent::SessionStatus(status), effects);
        } else if let Some(code) = snapshot.qr_code.clone() {
            self.on_qr(code, effects);
        } else {
            debug!("no active session and no pairing code; requesting one");
            effects.push(Effect::Emit(ClientEvent::RequestQr));
        }
    }

    fn on_confirmation_deadline(&mut self, effects: &mut Vec<Effect>) {
        if self.state != SessionState::AwaitingConfirmation || self.handshake.is_none() {
            return;
        }
        self.handshake = None;
        info!(
            timeout_secs = self.confirmation_timeout.as_secs(),
            "confirmation timed out; requesting a new pairing code"
        );
        effects.push(Effect::Emit(ClientEvent::RequestQr));
    }
}
