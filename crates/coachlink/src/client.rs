//! The gateway client.
//!
//! [`GatewayClient`] is a cheap, cloneable handle onto one session. Cloning
//! shares the session; calling [`GatewayClient::start`] twice creates two.

use std::sync::Arc;
use std::time::Duration;

use coachlink_proto::{SendRequest, SessionSnapshot};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::control_plane::{ControlPlane, HttpControlPlane};
use crate::error::{GatewayError, SendError};
use crate::message::OutboundMessage;
use crate::monitor::{KeepAliveConfig, LivenessMonitor};
use crate::notify::{MessageFailure, MessageReceipt, Notification, Notifier};
use crate::phone::PhonePlan;
use crate::session::driver::{DriverParts, SessionCommand, SessionDriver};
use crate::session::{SessionMachine, SessionState, SessionView};
use crate::transport::{Connector, TransportChannel, TransportConfig, WebSocketConnector};

const NOTIFICATION_CAPACITY: usize = 256;

/// Handle to a messaging-gateway session.
#[derive(Clone)]
pub struct GatewayClient {
    inner: Arc<Inner>,
}

struct Inner {
    commands: mpsc::UnboundedSender<SessionCommand>,
    view: watch::Receiver<SessionView>,
    notifier: Notifier,
    control_plane: Arc<dyn ControlPlane>,
    phone: PhonePlan,
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("view", &*self.inner.view.borrow())
            .finish_non_exhaustive()
    }
}

impl GatewayClient {
    /// Validate `config` and start a client with the WebSocket transport and
    /// the HTTP control plane.
    ///
    /// The session stays idle until [`open`](Self::open). Must be called
    /// within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn start(config: &GatewayConfig) -> Result<Self, GatewayError> {
        config.validate()?;
        let control_plane = HttpControlPlane::from_config(config)?;
        Ok(Self::with_parts(
            config,
            Arc::new(WebSocketConnector),
            Arc::new(control_plane),
        ))
    }

    /// Start a client over caller-supplied transport and control plane.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn with_parts(
        config: &GatewayConfig,
        connector: Arc<dyn Connector>,
        control_plane: Arc<dyn ControlPlane>,
    ) -> Self {
        let (transport, transport_events) =
            TransportChannel::spawn(TransportConfig::from(config), connector);
        let (view_tx, view_rx) = watch::channel(SessionView::default());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let notifier = Notifier::new(NOTIFICATION_CAPACITY);

        let driver = SessionDriver::new(DriverParts {
            machine: SessionMachine::new(config.confirmation_timeout()),
            transport,
            transport_events,
            commands: cmd_rx,
            control_plane: Arc::clone(&control_plane),
            notifier: notifier.clone(),
            view: view_tx,
            monitor: LivenessMonitor::new(KeepAliveConfig::from(config)),
        });
        tokio::spawn(driver.run());

        Self {
            inner: Arc::new(Inner {
                commands: cmd_tx,
                view: view_rx,
                notifier,
                control_plane,
                phone: config.phone.clone(),
            }),
        }
    }

    fn command(&self, cmd: SessionCommand) -> Result<(), GatewayError> {
        self.inner
            .commands
            .send(cmd)
            .map_err(|_| GatewayError::Closed)
    }

    /// Start connecting. Later calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Closed`] after shutdown.
    pub fn open(&self) -> Result<(), GatewayError> {
        self.command(SessionCommand::Open)
    }

    /// Tear the connection down and start over, from any state.
    ///
    /// This is the only way out of [`SessionState::AuthFailure`].
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Closed`] after shutdown.
    pub fn reconnect(&self) -> Result<(), GatewayError> {
        info!("reconnect requested");
        self.command(SessionCommand::Reconnect)
    }

    /// Drop the session, log it out on the gateway, then reconnect.
    ///
    /// Resolves once the logout call finished; the reconnect continues in
    /// the background.
    ///
    /// # Errors
    ///
    /// Returns the logout failure, or [`GatewayError::Closed`] after
    /// shutdown.
    pub async fn force_disconnect(&self) -> Result<(), GatewayError> {
        info!("forced disconnect requested");
        let (reply, rx) = oneshot::channel();
        self.command(SessionCommand::ForceDisconnect { reply })?;
        rx.await.map_err(|_| GatewayError::Closed)?
    }

    /// Stop the session and release its connection and timers.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.command(SessionCommand::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.view.borrow().state
    }

    /// Pairing code currently on offer.
    #[must_use]
    pub fn pending_qr(&self) -> Option<String> {
        self.inner.view.borrow().pending_qr.clone()
    }

    /// Full session snapshot.
    #[must_use]
    pub fn view(&self) -> SessionView {
        self.inner.view.borrow().clone()
    }

    /// Receiver of session snapshots, updated on every change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionView> {
        self.inner.view.clone()
    }

    /// Register a notification listener. Drop the receiver to unregister.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.inner.notifier.subscribe()
    }

    /// Wait until the session reaches `target`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Timeout`] if `target` is not reached in time.
    pub async fn wait_for_state(
        &self,
        target: SessionState,
        timeout: Duration,
    ) -> Result<(), GatewayError> {
        let mut view = self.inner.view.clone();
        match tokio::time::timeout(timeout, view.wait_for(|v| v.state == target)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(GatewayError::Closed),
            Err(_) => Err(GatewayError::Timeout {
                what: format!("session state {target}"),
                secs: timeout.as_secs(),
            }),
        }
    }

    /// Ask the gateway for its view of the session. Does not change local
    /// state.
    ///
    /// # Errors
    ///
    /// Returns an error if the control plane call fails.
    pub async fn status(&self) -> Result<SessionSnapshot, GatewayError> {
        Ok(self.inner.control_plane.status().await?)
    }

    /// Send a text message.
    ///
    /// The message is validated and the recipient normalized first; nothing
    /// goes over the network unless the session is fully connected.
    ///
    /// # Errors
    ///
    /// - [`SendError::Validation`] if the message is rejected locally.
    /// - [`SendError::NotConnected`] if the session cannot send yet.
    /// - [`SendError::DeliverySendFailed`] if the gateway call fails.
    pub async fn send_message(&self, to: &str, body: &str) -> Result<(), SendError> {
        let message = OutboundMessage::new(to, body, &self.inner.phone)?;

        let state = self.state();
        if !state.accepts_sends() {
            return Err(SendError::NotConnected { state });
        }

        let request = SendRequest {
            to: message.normalized_recipient.clone(),
            message: message.body.clone(),
        };
        match self.inner.control_plane.send(request).await {
            Ok(()) => {
                info!(to = %message.normalized_recipient, "message sent");
                self.inner.notifier.notify(Notification::MessageSent(MessageReceipt::sent(
                    &message.normalized_recipient,
                    &message.body,
                )));
                Ok(())
            }
            Err(e) => {
                warn!(to = %message.normalized_recipient, error = %e, "message send failed");
                self.inner.notifier.notify(Notification::MessageError(
                    MessageFailure::send_failed(&message.normalized_recipient, e.to_string()),
                ));
                Err(SendError::DeliverySendFailed(e.to_string()))
            }
        }
    }
}
