//! End-to-end tests over a real WebSocket.
//!
//! A mock gateway accepts connections on a local port and speaks the event
//! protocol; the HTTP control plane is served by wiremock.

use std::net::SocketAddr;
use std::time::Duration;

use coachlink::{GatewayClient, GatewayConfig, SessionState};
use coachlink_proto::{EventFrame, GatewayEvent, SessionStatusKind, SessionStatusPayload};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Test Helpers - Mock Gateway
// ============================================================================

struct MockGateway {
    listener: TcpListener,
    addr: SocketAddr,
}

impl MockGateway {
    async fn new() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        Self { listener, addr }
    }

    fn url(&self) -> String {
        format!("ws://{}/events", self.addr)
    }

    async fn accept(&self) -> WebSocketStream<TcpStream> {
        let (stream, _) = timeout(WAIT, self.listener.accept())
            .await
            .expect("client never connected")
            .unwrap();
        accept_async(stream).await.unwrap()
    }
}

async fn push(ws: &mut WebSocketStream<TcpStream>, event: GatewayEvent) {
    let json = event.to_frame().unwrap().to_json().unwrap();
    ws.send(Message::Text(json.into())).await.unwrap();
}

async fn next_event_name(ws: &mut WebSocketStream<TcpStream>) -> String {
    loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .expect("no frame from client")
            .expect("client hung up")
            .unwrap();
        if let Message::Text(text) = msg {
            return EventFrame::from_json(&text).unwrap().event;
        }
    }
}

async fn control_plane(snapshot: serde_json::Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/whatsapp/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(snapshot))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/whatsapp/send"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .mount(&server)
        .await;
    server
}

fn config(server: &MockServer, gateway: &MockGateway) -> GatewayConfig {
    let mut config = GatewayConfig::new(server.uri(), gateway.url());
    config.reconnect.base_delay_ms = 10;
    config.reconnect.max_delay_ms = 50;
    config
}

// ============================================================================
// Flows
// ============================================================================

#[tokio::test]
async fn test_pairing_over_websocket() {
    let gateway = MockGateway::new().await;
    let server = control_plane(json!({"connected": false})).await;
    let client = GatewayClient::start(&config(&server, &gateway)).unwrap();

    client.open().unwrap();
    let mut ws = gateway.accept().await;
    assert_eq!(next_event_name(&mut ws).await, "request_qr");

    push(&mut ws, GatewayEvent::Qr("data:image/png;base64,AAA".to_string())).await;
    client
        .wait_for_state(SessionState::AwaitingQr, WAIT)
        .await
        .unwrap();

    push(
        &mut ws,
        GatewayEvent::SessionStatus(
            SessionStatusPayload::new(SessionStatusKind::Connected).requiring_confirmation(),
        ),
    )
    .await;
    assert_eq!(next_event_name(&mut ws).await, "connection_confirmed");

    push(
        &mut ws,
        GatewayEvent::SessionStatus(SessionStatusPayload::new(SessionStatusKind::FullyConnected)),
    )
    .await;
    client
        .wait_for_state(SessionState::FullyConnected, WAIT)
        .await
        .unwrap();

    client.send_message("1123456789", "hola").await.unwrap();
    let requests = server.received_requests().await.unwrap();
    let send = requests
        .iter()
        .find(|r| r.url.path() == "/api/whatsapp/send")
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&send.body).unwrap();
    assert_eq!(body, json!({"to": "5491123456789", "message": "hola"}));

    client.shutdown().await;
}

#[tokio::test]
async fn test_server_close_triggers_reconnect() {
    let gateway = MockGateway::new().await;
    let server = control_plane(json!({"connected": true})).await;
    let client = GatewayClient::start(&config(&server, &gateway)).unwrap();

    client.open().unwrap();
    let mut ws = gateway.accept().await;
    client
        .wait_for_state(SessionState::FullyConnected, WAIT)
        .await
        .unwrap();

    ws.close(None).await.unwrap();
    drop(ws);
    client
        .wait_for_state(SessionState::Disconnected, WAIT)
        .await
        .unwrap();

    let _ws = gateway.accept().await;
    client
        .wait_for_state(SessionState::FullyConnected, WAIT)
        .await
        .unwrap();

    client.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_gateway_keeps_trying() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let server = control_plane(json!({"connected": false})).await;
    let mut config = GatewayConfig::new(server.uri(), format!("ws://{addr}/events"));
    config.reconnect.base_delay_ms = 10;
    config.reconnect.max_delay_ms = 20;
    let client = GatewayClient::start(&config).unwrap();

    client.open().unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.state(), SessionState::Connecting);

    // Bring the gateway up on the same port; the client should find it.
    let listener = TcpListener::bind(addr).await.unwrap();
    let gateway = MockGateway { listener, addr };
    let mut ws = gateway.accept().await;
    assert_eq!(next_event_name(&mut ws).await, "request_qr");

    client.shutdown().await;
}
