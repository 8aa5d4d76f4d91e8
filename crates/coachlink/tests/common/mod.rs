//! Shared test doubles: a scripted connector and an in-process control plane.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use coachlink::config::{GatewayConfig, KeepAliveSettings, ReconnectSettings, SessionSettings};
use coachlink::error::{ControlPlaneError, TransportError};
use coachlink::{Connection, Connector, ControlPlane, GatewayClient, MemoryPeer};
use coachlink_proto::{EventFrame, SendRequest, SessionSnapshot};
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const PRIMARY: &str = "ws://primary.test/events";
pub const SECONDARY: &str = "ws://secondary.test/events";

/// How long tests wait for anything before failing.
pub const WAIT: Duration = Duration::from_secs(5);

/// Config with millisecond backoff so reconnect tests run quickly.
pub fn fast_config() -> GatewayConfig {
    let mut config = GatewayConfig::new("http://control.test", PRIMARY);
    config.reconnect = ReconnectSettings {
        base_delay_ms: 5,
        max_delay_ms: 20,
        max_attempts: 5,
        handshake_timeout_secs: 2,
    };
    config.keep_alive = KeepAliveSettings {
        check_interval_secs: 60,
        ping_interval_secs: 60,
    };
    config.session = SessionSettings {
        confirmation_timeout_secs: 1,
    };
    config
}

// ============================================================================
// Connector
// ============================================================================

/// Connector whose attempts follow a script; once the script runs out every
/// attempt succeeds with an in-memory connection.
pub struct FakeConnector {
    script: Mutex<VecDeque<bool>>,
    dialed: Mutex<Vec<String>>,
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

impl FakeConnector {
    /// `script[i]` says whether attempt `i` succeeds.
    pub fn new(script: impl IntoIterator<Item = bool>) -> (Arc<Self>, PeerQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            dialed: Mutex::new(Vec::new()),
            peers: tx,
        });
        (connector, PeerQueue(rx))
    }

    /// Every attempt succeeds.
    pub fn accepting() -> (Arc<Self>, PeerQueue) {
        Self::new([])
    }

    /// Endpoints dialed so far, in order.
    pub fn dialed(&self) -> Vec<String> {
        self.dialed.lock().unwrap().clone()
    }
}

impl Connector for FakeConnector {
    fn connect<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, Result<Connection, TransportError>> {
        Box::pin(async move {
            self.dialed.lock().unwrap().push(endpoint.to_string());
            let succeed = self.script.lock().unwrap().pop_front().unwrap_or(true);
            if !succeed {
                return Err(TransportError::Connect {
                    endpoint: endpoint.to_string(),
                    reason: "connection refused".to_string(),
                });
            }
            let (connection, peer) = Connection::in_memory();
            let _ = self.peers.send(peer);
            Ok(connection)
        })
    }
}

/// Server sides of the connections handed out, in order.
pub struct PeerQueue(mpsc::UnboundedReceiver<MemoryPeer>);

impl PeerQueue {
    pub async fn next(&mut self) -> MemoryPeer {
        timeout(WAIT, self.0.recv())
            .await
            .expect("no connection within timeout")
            .expect("connector dropped")
    }

    pub async fn none_within(&mut self, wait: Duration) -> bool {
        timeout(wait, self.0.recv()).await.is_err()
    }
}

/// Next frame the client sent, failing the test on timeout.
pub async fn next_frame(peer: &mut MemoryPeer) -> EventFrame {
    timeout(WAIT, peer.recv_frame())
        .await
        .expect("no frame within timeout")
        .expect("client hung up")
}

// ============================================================================
// Control plane
// ============================================================================

/// In-process control plane that counts calls.
#[derive(Default)]
pub struct FakeControlPlane {
    pub snapshot: Mutex<SessionSnapshot>,
    pub fail_sends: Mutex<bool>,
    pub fail_pings: Mutex<bool>,
    pub sent: Mutex<Vec<SendRequest>>,
    pub status_calls: AtomicUsize,
    pub send_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pub ping_calls: AtomicUsize,
}

impl FakeControlPlane {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub fn ping_calls(&self) -> usize {
        self.ping_calls.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` pings arrived.
    pub async fn wait_for_pings(&self, count: usize) {
        timeout(WAIT, async {
            while self.ping_calls() < count {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("pings not sent within timeout");
    }
}

impl ControlPlane for FakeControlPlane {
    fn status(&self) -> BoxFuture<'_, Result<SessionSnapshot, ControlPlaneError>> {
        Box::pin(async move {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.snapshot.lock().unwrap().clone())
        })
    }

    fn send(&self, request: SendRequest) -> BoxFuture<'_, Result<(), ControlPlaneError>> {
        Box::pin(async move {
            self.send_calls.fetch_add(1, Ordering::SeqCst);
            if *self.fail_sends.lock().unwrap() {
                return Err(ControlPlaneError::Status {
                    path: "send".to_string(),
                    code: 500,
                    body: "session not ready".to_string(),
                });
            }
            self.sent.lock().unwrap().push(request);
            Ok(())
        })
    }

    fn logout(&self) -> BoxFuture<'_, Result<(), ControlPlaneError>> {
        Box::pin(async move {
            self.logout_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), ControlPlaneError>> {
        Box::pin(async move {
            self.ping_calls.fetch_add(1, Ordering::SeqCst);
            if *self.fail_pings.lock().unwrap() {
                return Err(ControlPlaneError::Request {
                    path: "ping".to_string(),
                    reason: "connection reset".to_string(),
                });
            }
            Ok(())
        })
    }
}

// ============================================================================
// Client
// ============================================================================

pub struct Harness {
    pub client: GatewayClient,
    pub connector: Arc<FakeConnector>,
    pub control_plane: Arc<FakeControlPlane>,
    pub peers: PeerQueue,
}

impl Harness {
    pub fn new(config: &GatewayConfig) -> Self {
        let (connector, peers) = FakeConnector::accepting();
        Self::with_connector(config, connector, peers)
    }

    pub fn with_connector(
        config: &GatewayConfig,
        connector: Arc<FakeConnector>,
        peers: PeerQueue,
    ) -> Self {
        let control_plane = FakeControlPlane::new();
        let client = GatewayClient::with_parts(
            config,
            Arc::clone(&connector) as Arc<dyn Connector>,
            Arc::clone(&control_plane) as Arc<dyn ControlPlane>,
        );
        Self {
            client,
            connector,
            control_plane,
            peers,
        }
    }
}
