//! The transport channel actor.
//!
//! A single task owns the connection and walks through four phases:
//!
//! ```text
//! Idle --open--> Dialing --ok--> Live --drop--> Backoff --timer/open--> Dialing
//!                   |                               ^
//!                   +------------fail---------------+
//! ```
//!
//! `close()` returns the task to `Idle` from any phase, cancelling a pending
//! dial or backoff timer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use coachlink_proto::{ClientEvent, EventFrame};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::error::TransportError;

use super::connector::{Connection, Connector, WireEvent};
use super::events::{TransportEvent, TransportUpdate};
use super::policy::{EndpointSlot, FailureOutcome, ReconnectConfig, ReconnectPolicy};

const EVENT_CAPACITY: usize = 64;

/// Event-channel endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Endpoint tried first.
    pub primary: String,
    /// Failover endpoint.
    pub secondary: Option<String>,
}

impl Endpoints {
    fn get(&self, slot: EndpointSlot) -> &str {
        match (slot, &self.secondary) {
            (EndpointSlot::Secondary, Some(secondary)) => secondary,
            _ => &self.primary,
        }
    }
}

/// Transport channel configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Endpoints to connect to.
    pub endpoints: Endpoints,
    /// Backoff and failover settings.
    pub reconnect: ReconnectConfig,
}

impl From<&GatewayConfig> for TransportConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            endpoints: Endpoints {
                primary: config.primary_endpoint.clone(),
                secondary: config.secondary_endpoint.clone(),
            },
            reconnect: ReconnectConfig::from(&config.reconnect),
        }
    }
}

#[derive(Debug)]
enum TransportCommand {
    Open,
    Close,
    Emit(EventFrame),
    Shutdown,
}

/// Handle to the transport channel task.
///
/// Events come out of the receiver returned by [`TransportChannel::spawn`].
#[derive(Debug)]
pub struct TransportChannel {
    commands: mpsc::UnboundedSender<TransportCommand>,
    connected: Arc<AtomicBool>,
    generation: AtomicU64,
}

impl TransportChannel {
    /// Spawn the channel task. The channel starts idle.
    #[must_use]
    pub fn spawn(
        config: TransportConfig,
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::Receiver<TransportUpdate>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));

        let task = ChannelTask {
            policy: ReconnectPolicy::new(config.reconnect, config.endpoints.secondary.is_some()),
            endpoints: config.endpoints,
            connector,
            commands: cmd_rx,
            events: event_tx,
            connected: Arc::clone(&connected),
            generation: 0,
            has_connected: false,
            outage_attempts: 0,
        };
        tokio::spawn(task.run());

        let handle = Self {
            commands: cmd_tx,
            connected,
            generation: AtomicU64::new(0),
        };
        (handle, event_rx)
    }

    /// Start connecting. No-op while connecting or connected; cuts a backoff
    /// wait short.
    pub fn open(&self) {
        let _ = self.commands.send(TransportCommand::Open);
    }

    /// Drop the connection and cancel any pending reconnect.
    ///
    /// Events emitted before the close carry an older generation.
    pub fn close(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.commands.send(TransportCommand::Close);
    }

    /// Send an event to the gateway. Dropped if not connected.
    pub fn emit(&self, event: ClientEvent) {
        let _ = self.commands.send(TransportCommand::Emit(event.to_frame()));
    }

    /// Stop the channel task.
    pub fn shutdown(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.commands.send(TransportCommand::Shutdown);
    }

    /// Whether a connection is currently live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Current generation; compare with [`TransportUpdate::generation`].
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

enum Phase {
    Idle,
    Dialing,
    Live(Connection),
    Backoff(Instant),
    Stopped,
}

struct ChannelTask {
    endpoints: Endpoints,
    policy: ReconnectPolicy,
    connector: Arc<dyn Connector>,
    commands: mpsc::UnboundedReceiver<TransportCommand>,
    events: mpsc::Sender<TransportUpdate>,
    connected: Arc<AtomicBool>,
    generation: u64,
    has_connected: bool,
    outage_attempts: u32,
}

impl ChannelTask {
    async fn run(mut self) {
        let mut phase = Phase::Idle;
        loop {
            phase = match phase {
                Phase::Idle => self.idle().await,
                Phase::Dialing => self.dial().await,
                Phase::Live(connection) => self.live(connection).await,
                Phase::Backoff(until) => self.backoff(until).await,
                Phase::Stopped => break,
            };
        }
        self.connected.store(false, Ordering::SeqCst);
        debug!("transport channel stopped");
    }

    async fn idle(&mut self) -> Phase {
        loop {
            match self.commands.recv().await {
                None | Some(TransportCommand::Shutdown) => return Phase::Stopped,
                Some(TransportCommand::Open) => return Phase::Dialing,
                Some(TransportCommand::Close) => self.mark_closed(),
                Some(TransportCommand::Emit(frame)) => drop_outbound(&frame),
            }
        }
    }

    async fn dial(&mut self) -> Phase {
        let slot = self.policy.current();
        let endpoint = self.endpoints.get(slot).to_string();
        let handshake = self.policy.handshake_timeout();
        self.policy.record_attempt();
        self.outage_attempts += 1;
        debug!(endpoint = %endpoint, attempt = self.outage_attempts, "connecting");

        let connector = Arc::clone(&self.connector);
        let target = endpoint.clone();
        let attempt = async move { timeout(handshake, connector.connect(&target)).await };
        tokio::pin!(attempt);

        let result = loop {
            tokio::select! {
                result = &mut attempt => break result,
                cmd = self.commands.recv() => match cmd {
                    None | Some(TransportCommand::Shutdown) => return Phase::Stopped,
                    Some(TransportCommand::Close) => {
                        self.mark_closed();
                        return Phase::Idle;
                    }
                    Some(TransportCommand::Open) => {}
                    Some(TransportCommand::Emit(frame)) => drop_outbound(&frame),
                },
            }
        };

        match result {
            Ok(Ok(connection)) => self.on_connected(endpoint, connection).await,
            Ok(Err(e)) => self.on_connect_failure(endpoint, e.to_string()).await,
            Err(_) => {
                let error = TransportError::HandshakeTimeout {
                    endpoint: endpoint.clone(),
                    secs: handshake.as_secs(),
                };
                self.on_connect_failure(endpoint, error.to_string()).await
            }
        }
    }

    async fn live(&mut self, mut connection: Connection) -> Phase {
        loop {
            tokio::select! {
                wire = connection.recv() => match wire {
                    WireEvent::Text(text) => match EventFrame::from_json(&text) {
                        Ok(frame) => {
                            if !self.publish(TransportEvent::Frame(frame)).await {
                                return Phase::Stopped;
                            }
                        }
                        Err(e) => warn!(error = %e, "dropping undecodable frame"),
                    },
                    WireEvent::Closed(reason) => {
                        drop(connection);
                        return self.on_disconnected(reason).await;
                    }
                },
                cmd = self.commands.recv() => match cmd {
                    None | Some(TransportCommand::Shutdown) => return Phase::Stopped,
                    Some(TransportCommand::Close) => {
                        info!("closing event channel");
                        self.mark_closed();
                        return Phase::Idle;
                    }
                    Some(TransportCommand::Open) => {}
                    Some(TransportCommand::Emit(frame)) => match frame.to_json() {
                        Ok(json) => {
                            debug!(event = %frame.event, "emitting");
                            if let Err(e) = connection.send(json).await {
                                warn!(event = %frame.event, error = %e, "emit failed");
                            }
                        }
                        Err(e) => warn!(event = %frame.event, error = %e, "cannot encode frame"),
                    },
                },
            }
        }
    }

    async fn backoff(&mut self, until: Instant) -> Phase {
        let timer = sleep_until(until);
        tokio::pin!(timer);
        loop {
            tokio::select! {
                () = &mut timer => return Phase::Dialing,
                cmd = self.commands.recv() => match cmd {
                    None | Some(TransportCommand::Shutdown) => return Phase::Stopped,
                    Some(TransportCommand::Close) => {
                        self.mark_closed();
                        return Phase::Idle;
                    }
                    Some(TransportCommand::Open) => {
                        debug!("open requested during backoff; dialing now");
                        return Phase::Dialing;
                    }
                    Some(TransportCommand::Emit(frame)) => drop_outbound(&frame),
                },
            }
        }
    }

    async fn on_connected(&mut self, endpoint: String, connection: Connection) -> Phase {
        let attempts = self.outage_attempts;
        self.policy.record_success();
        self.outage_attempts = 0;
        self.connected.store(true, Ordering::SeqCst);

        let event = if self.has_connected {
            info!(endpoint = %endpoint, attempts, "event channel reconnected");
            TransportEvent::Reconnected {
                endpoint,
                attempt: attempts,
            }
        } else {
            info!(endpoint = %endpoint, "event channel connected");
            TransportEvent::Connected { endpoint }
        };
        self.has_connected = true;

        if self.publish(event).await {
            Phase::Live(connection)
        } else {
            Phase::Stopped
        }
    }

    async fn on_connect_failure(&mut self, endpoint: String, reason: String) -> Phase {
        let outcome = self.policy.record_failure();
        warn!(
            endpoint = %endpoint,
            attempt = outcome.failures,
            error = %reason,
            "connect failed"
        );

        let exhausted = outcome.exhausted.is_some();
        let error = TransportEvent::ConnectError {
            endpoint: endpoint.clone(),
            reason: reason.clone(),
            attempt: outcome.failures,
        };
        if !self.publish(error).await {
            return Phase::Stopped;
        }

        if exhausted {
            warn!(
                endpoint = %endpoint,
                attempts = outcome.failures,
                next = %self.endpoints.get(outcome.next),
                "endpoint exhausted; failing over"
            );
            let event = TransportEvent::EndpointExhausted {
                endpoint,
                attempts: outcome.failures,
                last_error: reason,
            };
            if !self.publish(event).await {
                return Phase::Stopped;
            }
        }

        self.schedule_retry(outcome).await
    }

    async fn on_disconnected(&mut self, reason: String) -> Phase {
        self.connected.store(false, Ordering::SeqCst);
        warn!(reason = %reason, "event channel disconnected");
        if !self
            .publish(TransportEvent::Disconnected { reason })
            .await
        {
            return Phase::Stopped;
        }
        let outcome = self.policy.record_failure();
        self.schedule_retry(outcome).await
    }

    async fn schedule_retry(&mut self, outcome: FailureOutcome) -> Phase {
        let event = TransportEvent::Reconnecting {
            endpoint: self.endpoints.get(outcome.next).to_string(),
            attempt: self.outage_attempts + 1,
            delay: outcome.delay,
        };
        debug!(delay_ms = outcome.delay.as_millis() as u64, "scheduling reconnect");
        if self.publish(event).await {
            Phase::Backoff(Instant::now() + outcome.delay)
        } else {
            Phase::Stopped
        }
    }

    fn mark_closed(&mut self) {
        self.generation += 1;
        self.connected.store(false, Ordering::SeqCst);
        self.has_connected = false;
        self.outage_attempts = 0;
    }

    async fn publish(&self, event: TransportEvent) -> bool {
        let update = TransportUpdate {
            generation: self.generation,
            event,
        };
        self.events.send(update).await.is_ok()
    }
}

fn drop_outbound(frame: &EventFrame) {
    debug!(event = %frame.event, "event channel not connected; dropping outbound event");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use std::sync::Mutex;

    use futures::future::BoxFuture;

    use super::*;
    use crate::transport::MemoryPeer;

    /// Connector that fails a fixed number of times, then hands out
    /// in-memory connections.
    struct ScriptedConnector {
        failures: Mutex<u32>,
        dialed: Mutex<Vec<String>>,
        peers: mpsc::UnboundedSender<MemoryPeer>,
    }

    impl Connector for ScriptedConnector {
        fn connect<'a>(
            &'a self,
            endpoint: &'a str,
        ) -> BoxFuture<'a, Result<Connection, TransportError>> {
            Box::pin(async move {
                self.dialed.lock().unwrap().push(endpoint.to_string());
                let mut failures = self.failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(TransportError::Connect {
                        endpoint: endpoint.to_string(),
                        reason: "refused".to_string(),
                    });
                }
                drop(failures);
                let (connection, peer) = Connection::in_memory();
                let _ = self.peers.send(peer);
                Ok(connection)
            })
        }
    }

    fn fast_config(secondary: bool) -> TransportConfig {
        TransportConfig {
            endpoints: Endpoints {
                primary: "ws://primary".to_string(),
                secondary: secondary.then(|| "ws://secondary".to_string()),
            },
            reconnect: ReconnectConfig {
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                max_attempts: 5,
                handshake_timeout: Duration::from_secs(1),
            },
        }
    }

    fn scripted(
        failures: u32,
    ) -> (
        Arc<ScriptedConnector>,
        mpsc::UnboundedReceiver<MemoryPeer>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(ScriptedConnector {
            failures: Mutex::new(failures),
            dialed: Mutex::new(Vec::new()),
            peers: tx,
        });
        (connector, rx)
    }

    async fn next_event(rx: &mut mpsc::Receiver<TransportUpdate>) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for transport event")
            .expect("transport channel stopped")
            .event
    }

    #[tokio::test]
    async fn test_open_connects() {
        let (connector, mut peers) = scripted(0);
        let (channel, mut events) = TransportChannel::spawn(fast_config(false), connector);
        assert!(!channel.is_connected());

        channel.open();
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Connected {
                endpoint: "ws://primary".to_string()
            }
        );
        assert!(channel.is_connected());
        assert!(peers.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_emit_reaches_peer() {
        let (connector, mut peers) = scripted(0);
        let (channel, mut events) = TransportChannel::spawn(fast_config(false), connector);
        channel.open();
        next_event(&mut events).await;
        let mut peer = peers.recv().await.unwrap();

        channel.emit(ClientEvent::RequestQr);
        let frame = peer.recv_frame().await.unwrap();
        assert_eq!(frame, EventFrame::bare("request_qr"));
    }

    #[tokio::test]
    async fn test_frames_are_forwarded_and_garbage_dropped() {
        let (connector, mut peers) = scripted(0);
        let (channel, mut events) = TransportChannel::spawn(fast_config(false), connector);
        channel.open();
        next_event(&mut events).await;
        let peer = peers.recv().await.unwrap();

        peer.send_text("{{{").await;
        peer.send_frame(&EventFrame::bare("qr")).await;
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Frame(EventFrame::bare("qr"))
        );
    }

    #[tokio::test]
    async fn test_drop_triggers_reconnect() {
        let (connector, mut peers) = scripted(0);
        let (channel, mut events) = TransportChannel::spawn(fast_config(false), connector);
        channel.open();
        next_event(&mut events).await;
        let peer = peers.recv().await.unwrap();

        peer.close("transport close").await;
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Disconnected {
                reason: "transport close".to_string()
            }
        );
        assert!(matches!(
            next_event(&mut events).await,
            TransportEvent::Reconnecting { attempt: 1, .. }
        ));
        assert!(matches!(
            next_event(&mut events).await,
            TransportEvent::Reconnected { attempt: 1, .. }
        ));
        assert!(channel.is_connected());
    }

    #[tokio::test]
    async fn test_failover_after_five_failures() {
        let (connector, _peers) = scripted(5);
        let (channel, mut events) =
            TransportChannel::spawn(fast_config(true), Arc::clone(&connector) as Arc<dyn Connector>);
        channel.open();

        loop {
            if let TransportEvent::Connected { endpoint } = next_event(&mut events).await {
                assert_eq!(endpoint, "ws://secondary");
                break;
            }
        }

        let dialed = connector.dialed.lock().unwrap().clone();
        assert_eq!(dialed.len(), 6);
        assert!(dialed[..5].iter().all(|e| e == "ws://primary"));
        assert_eq!(dialed[5], "ws://secondary");
    }

    #[tokio::test]
    async fn test_exhaustion_is_reported() {
        let (connector, _peers) = scripted(5);
        let (channel, mut events) = TransportChannel::spawn(fast_config(true), connector);
        channel.open();

        loop {
            if let TransportEvent::EndpointExhausted {
                endpoint, attempts, ..
            } = next_event(&mut events).await
            {
                assert_eq!(endpoint, "ws://primary");
                assert_eq!(attempts, 5);
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_close_stops_reconnecting() {
        let (connector, _peers) = scripted(u32::MAX);
        let (channel, mut events) =
            TransportChannel::spawn(fast_config(false), Arc::clone(&connector) as Arc<dyn Connector>);
        channel.open();
        next_event(&mut events).await;

        channel.close();
        assert_eq!(channel.generation(), 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let count = connector.dialed.lock().unwrap().len();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(connector.dialed.lock().unwrap().len(), count);
    }

    #[tokio::test]
    async fn test_open_is_idempotent_while_connected() {
        let (connector, mut peers) = scripted(0);
        let (channel, mut events) =
            TransportChannel::spawn(fast_config(false), Arc::clone(&connector) as Arc<dyn Connector>);
        channel.open();
        next_event(&mut events).await;
        let _peer = peers.recv().await.unwrap();

        channel.open();
        channel.open();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(connector.dialed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_events_after_close_carry_new_generation() {
        let (connector, mut peers) = scripted(0);
        let (channel, mut events) = TransportChannel::spawn(fast_config(false), connector);
        channel.open();
        let first = events.recv().await.unwrap();
        assert_eq!(first.generation, 0);
        let _old = peers.recv().await.unwrap();

        channel.close();
        channel.open();
        let update = loop {
            let update = events.recv().await.unwrap();
            if matches!(update.event, TransportEvent::Connected { .. }) {
                break update;
            }
        };
        assert_eq!(update.generation, channel.generation());
    }
}
