//! Backoff and endpoint failover through the public client.

mod common;

use std::time::Duration;

use coachlink::{Notification, NotificationKind, SessionState};
use tokio::time::timeout;

use common::{FakeConnector, Harness, PRIMARY, SECONDARY, WAIT, fast_config, next_frame};

#[tokio::test]
async fn test_sixth_attempt_targets_secondary() {
    let config = fast_config().with_secondary_endpoint(SECONDARY);
    let (connector, peers) = FakeConnector::new([false; 5]);
    let mut h = Harness::with_connector(&config, connector, peers);

    h.client.open().unwrap();
    let mut peer = h.peers.next().await;
    assert_eq!(next_frame(&mut peer).await.event, "request_qr");

    let dialed = h.connector.dialed();
    assert_eq!(dialed.len(), 6);
    assert!(dialed[..5].iter().all(|e| e == PRIMARY));
    assert_eq!(dialed[5], SECONDARY);
}

#[tokio::test]
async fn test_exhaustion_notifies_listeners() {
    let config = fast_config().with_secondary_endpoint(SECONDARY);
    let (connector, peers) = FakeConnector::new([false; 5]);
    let mut h = Harness::with_connector(&config, connector, peers);
    let mut notifications = h.client.subscribe();

    h.client.open().unwrap();
    let _peer = h.peers.next().await;

    let n = timeout(WAIT, async {
        loop {
            let n = notifications.recv().await.unwrap();
            if n.kind() == NotificationKind::ConnectionError {
                return n;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(
        n,
        Notification::ConnectionError {
            endpoint: PRIMARY.to_string(),
            attempts: 5,
            message: format!("connect to {PRIMARY} failed: connection refused"),
        }
    );
}

#[tokio::test]
async fn test_alternates_back_to_primary() {
    let config = fast_config().with_secondary_endpoint(SECONDARY);
    let (connector, peers) = FakeConnector::new([false; 10]);
    let mut h = Harness::with_connector(&config, connector, peers);

    h.client.open().unwrap();
    let _peer = h.peers.next().await;

    let dialed = h.connector.dialed();
    assert_eq!(dialed.len(), 11);
    assert!(dialed[5..10].iter().all(|e| e == SECONDARY));
    assert_eq!(dialed[10], PRIMARY);
}

#[tokio::test]
async fn test_single_endpoint_keeps_retrying() {
    let (connector, peers) = FakeConnector::new([false; 7]);
    let mut h = Harness::with_connector(&fast_config(), connector, peers);

    h.client.open().unwrap();
    let _peer = h.peers.next().await;

    let dialed = h.connector.dialed();
    assert_eq!(dialed.len(), 8);
    assert!(dialed.iter().all(|e| e == PRIMARY));
}

#[tokio::test]
async fn test_failures_keep_session_connecting() {
    let (connector, peers) = FakeConnector::new([false; 3]);
    let mut h = Harness::with_connector(&fast_config(), connector, peers);

    h.client.open().unwrap();
    let mut peer = h.peers.next().await;
    assert_eq!(next_frame(&mut peer).await.event, "request_qr");
    assert_eq!(h.client.state(), SessionState::Connecting);
}

#[tokio::test]
async fn test_reconnect_cuts_backoff_short() {
    let mut config = fast_config();
    config.reconnect.base_delay_ms = 10_000;
    config.reconnect.max_delay_ms = 10_000;
    let (connector, peers) = FakeConnector::new([false]);
    let mut h = Harness::with_connector(&config, connector, peers);

    h.client.open().unwrap();
    // First attempt fails; the retry would wait ten seconds.
    assert!(h.peers.none_within(Duration::from_millis(100)).await);

    h.client.reconnect().unwrap();
    let _peer = h.peers.next().await;
    assert_eq!(h.connector.dialed().len(), 2);
}
