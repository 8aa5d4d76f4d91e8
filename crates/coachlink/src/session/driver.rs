//! The session event loop.
//!
//! Every input to the session goes through one task, so transitions never
//! race. Control-plane calls run as spawned tasks and report back through a
//! `JoinSet`; nothing in the loop awaits the network directly.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use coachlink_proto::SessionSnapshot;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{sleep, Sleep};
use tracing::{debug, error, info, warn};

use crate::control_plane::ControlPlane;
use crate::error::{ControlPlaneError, GatewayError};
use crate::monitor::{LivenessMonitor, MonitorAction};
use crate::notify::Notifier;
use crate::transport::{TransportChannel, TransportUpdate};

use super::machine::{Effect, SessionInput, SessionMachine};
use super::state::SessionView;

/// Requests from client handles.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    Open,
    Reconnect,
    ForceDisconnect {
        reply: oneshot::Sender<Result<(), GatewayError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

enum Outcome {
    Probe {
        epoch: u64,
        result: Result<SessionSnapshot, ControlPlaneError>,
    },
    Ping(Result<(), ControlPlaneError>),
    Logout(Result<(), ControlPlaneError>),
}

enum TimerEvent {
    ConfirmationDeadline,
    Monitor(MonitorAction),
}

/// Every timer owned by the session, released together on teardown.
struct SessionTimers {
    confirmation: Option<Pin<Box<Sleep>>>,
    monitor: LivenessMonitor,
}

impl SessionTimers {
    fn start_confirmation(&mut self, timeout: Duration) {
        self.confirmation = Some(Box::pin(sleep(timeout)));
    }

    fn cancel_confirmation(&mut self) {
        self.confirmation = None;
    }

    fn teardown(&mut self) {
        self.confirmation = None;
        self.monitor.disarm();
    }

    async fn next(&mut self) -> TimerEvent {
        let Self {
            confirmation,
            monitor,
        } = self;
        let deadline = async {
            match confirmation.as_mut() {
                Some(timer) => timer.as_mut().await,
                None => std::future::pending().await,
            }
        };

        let event = tokio::select! {
            () = deadline => TimerEvent::ConfirmationDeadline,
            action = monitor.next_action() => TimerEvent::Monitor(action),
        };
        if matches!(event, TimerEvent::ConfirmationDeadline) {
            *confirmation = None;
        }
        event
    }
}

pub(crate) struct SessionDriver {
    machine: SessionMachine,
    transport: TransportChannel,
    transport_events: mpsc::Receiver<TransportUpdate>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    control_plane: Arc<dyn ControlPlane>,
    notifier: Notifier,
    view: watch::Sender<SessionView>,
    timers: SessionTimers,
    in_flight: JoinSet<Outcome>,
    probe_epoch: u64,
    logout_waiters: Vec<oneshot::Sender<Result<(), GatewayError>>>,
}

pub(crate) struct DriverParts {
    pub machine: SessionMachine,
    pub transport: TransportChannel,
    pub transport_events: mpsc::Receiver<TransportUpdate>,
    pub commands: mpsc::UnboundedReceiver<SessionCommand>,
    pub control_plane: Arc<dyn ControlPlane>,
    pub notifier: Notifier,
    pub view: watch::Sender<SessionView>,
    pub monitor: LivenessMonitor,
}

impl SessionDriver {
    pub(crate) fn new(parts: DriverParts) -> Self {
        Self {
            machine: parts.machine,
            transport: parts.transport,
            transport_events: parts.transport_events,
            commands: parts.commands,
            control_plane: parts.control_plane,
            notifier: parts.notifier,
            view: parts.view,
            timers: SessionTimers {
                confirmation: None,
                monitor: parts.monitor,
            },
            in_flight: JoinSet::new(),
            probe_epoch: 0,
            logout_waiters: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        debug!("session event loop started");
        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(SessionCommand::Shutdown { reply }) => {
                        self.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                Some(update) = self.transport_events.recv() => self.handle_transport(update),
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    self.handle_outcome(joined);
                }
                event = self.timers.next() => self.handle_timer(event),
            }
        }
        debug!("session event loop stopped");
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Open => self.apply(SessionInput::Open),
            SessionCommand::Reconnect => self.apply(SessionInput::Reconnect),
            SessionCommand::ForceDisconnect { reply } => {
                self.logout_waiters.push(reply);
                self.apply(SessionInput::ForceDisconnect);
            }
            SessionCommand::Shutdown { .. } => {}
        }
    }

    fn handle_transport(&mut self, update: TransportUpdate) {
        if update.generation != self.transport.generation() {
            debug!(
                generation = update.generation,
                current = self.transport.generation(),
                "dropping event from a closed connection"
            );
            return;
        }
        self.apply(SessionInput::Transport(update.event));
    }

    fn handle_outcome(&mut self, joined: Result<Outcome, JoinError>) {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => return,
            Err(e) => {
                error!(error = %e, "control plane task failed");
                return;
            }
        };

        match outcome {
            Outcome::Probe { epoch, result } => {
                if epoch != self.probe_epoch {
                    debug!(epoch, current = self.probe_epoch, "dropping stale status probe");
                    return;
                }
                match result {
                    Ok(snapshot) => self.apply(SessionInput::StatusProbe(snapshot)),
                    Err(e) => self.apply(SessionInput::StatusProbeFailed(e.to_string())),
                }
            }
            Outcome::Ping(Ok(())) => debug!("keep-alive ping ok"),
            Outcome::Ping(Err(e)) => warn!(error = %e, "keep-alive ping failed"),
            Outcome::Logout(result) => {
                match &result {
                    Ok(()) => info!("gateway session logged out"),
                    Err(e) => warn!(error = %e, "logout failed; reopening anyway"),
                }
                for waiter in self.logout_waiters.drain(..) {
                    let _ = waiter.send(result.clone().map_err(GatewayError::from));
                }
                self.apply(SessionInput::LogoutFinished);
            }
        }
    }

    fn handle_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::ConfirmationDeadline => self.apply(SessionInput::ConfirmationDeadline),
            TimerEvent::Monitor(MonitorAction::CheckLiveness) => {
                let connected = self.transport.is_connected();
                if LivenessMonitor::needs_reconnect(connected, self.machine.state())
                    && self.timers.monitor.schedule_reconnect()
                {
                    warn!(state = %self.machine.state(), "event channel down while session is up; scheduling reconnect");
                }
            }
            TimerEvent::Monitor(MonitorAction::Ping) => {
                if self.transport.is_connected() {
                    let control_plane = Arc::clone(&self.control_plane);
                    self.in_flight
                        .spawn(async move { Outcome::Ping(control_plane.ping().await) });
                }
            }
            TimerEvent::Monitor(MonitorAction::Reconnect) => {
                if !self.transport.is_connected() {
                    info!("liveness monitor reopening event channel");
                    self.transport.open();
                }
            }
        }
    }

    fn apply(&mut self, input: SessionInput) {
        let effects = self.machine.apply(input);
        for effect in effects {
            self.execute(effect);
        }
        self.publish_view();
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::OpenTransport => self.transport.open(),
            Effect::CloseTransport => {
                // In-flight probes belong to the closed connection.
                self.probe_epoch += 1;
                self.transport.close();
            }
            Effect::Emit(event) => self.transport.emit(event),
            Effect::QueryStatus => {
                self.probe_epoch += 1;
                let epoch = self.probe_epoch;
                let control_plane = Arc::clone(&self.control_plane);
                self.in_flight.spawn(async move {
                    Outcome::Probe {
                        epoch,
                        result: control_plane.status().await,
                    }
                });
            }
            Effect::Logout => {
                let control_plane = Arc::clone(&self.control_plane);
                self.in_flight
                    .spawn(async move { Outcome::Logout(control_plane.logout().await) });
            }
            Effect::StartConfirmationTimer(timeout) => self.timers.start_confirmation(timeout),
            Effect::CancelConfirmationTimer => self.timers.cancel_confirmation(),
            Effect::ArmMonitor => self.timers.monitor.arm(),
            Effect::DisarmMonitor => self.timers.monitor.disarm(),
            Effect::Notify(notification) => self.notifier.notify(notification),
        }
    }

    fn publish_view(&self) {
        let next = self.machine.view();
        self.view.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn shutdown(&mut self) {
        info!("shutting down session");
        self.timers.teardown();
        self.in_flight.abort_all();
        self.transport.close();
        self.transport.shutdown();
        for waiter in self.logout_waiters.drain(..) {
            let _ = waiter.send(Err(GatewayError::Closed));
        }
    }
}
