//! Connection establishment.
//!
//! A [`Connector`] turns an endpoint URL into a [`Connection`]: a pair of
//! channels carrying raw text frames, backed by whatever tasks drive the
//! underlying socket. [`WebSocketConnector`] is the production
//! implementation; [`Connection::in_memory`] gives a socket-free connection
//! for embedding and tests.

use coachlink_proto::EventFrame;
use futures::future::BoxFuture;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use crate::error::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CHANNEL_CAPACITY: usize = 32;

/// Something arriving from the remote side of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    /// A text frame.
    Text(String),
    /// The connection ended.
    Closed(String),
}

/// Establishes connections to event-channel endpoints.
pub trait Connector: Send + Sync + 'static {
    /// Connect to `endpoint`.
    fn connect<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, Result<Connection, TransportError>>;
}

/// A live connection.
///
/// Dropping the connection stops its reader and closes the outbound side.
#[derive(Debug)]
pub struct Connection {
    outbound: mpsc::Sender<String>,
    inbound: mpsc::Receiver<WireEvent>,
    _reader: ReaderGuard,
}

#[derive(Debug)]
struct ReaderGuard(Option<JoinHandle<()>>);

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

impl Connection {
    /// Wrap a pair of channels. `reader` is aborted when the connection drops.
    #[must_use]
    pub fn new(
        outbound: mpsc::Sender<String>,
        inbound: mpsc::Receiver<WireEvent>,
        reader: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            _reader: ReaderGuard(reader),
        }
    }

    /// Create a connection whose remote side is a [`MemoryPeer`].
    #[must_use]
    pub fn in_memory() -> (Self, MemoryPeer) {
        let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let connection = Self::new(out_tx, in_rx, None);
        let peer = MemoryPeer {
            to_client: in_tx,
            from_client: out_rx,
        };
        (connection, peer)
    }

    /// Queue a text frame for the remote side.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection has closed.
    pub async fn send(&self, text: String) -> Result<(), TransportError> {
        self.outbound
            .send(text)
            .await
            .map_err(|_| TransportError::Closed("outbound side closed".to_string()))
    }

    /// Wait for the next event from the remote side.
    pub async fn recv(&mut self) -> WireEvent {
        self.inbound
            .recv()
            .await
            .unwrap_or_else(|| WireEvent::Closed("connection closed".to_string()))
    }
}

/// Remote end of an in-memory [`Connection`].
///
/// Dropping the peer closes the connection.
#[derive(Debug)]
pub struct MemoryPeer {
    to_client: mpsc::Sender<WireEvent>,
    from_client: mpsc::Receiver<String>,
}

impl MemoryPeer {
    /// Deliver a raw text frame to the client.
    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client.send(WireEvent::Text(text.into())).await.is_ok()
    }

    /// Deliver an event frame to the client.
    pub async fn send_frame(&self, frame: &EventFrame) -> bool {
        match frame.to_json() {
            Ok(json) => self.send_text(json).await,
            Err(_) => false,
        }
    }

    /// Close the connection with a reason.
    pub async fn close(self, reason: impl Into<String>) {
        let _ = self.to_client.send(WireEvent::Closed(reason.into())).await;
    }

    /// Next raw text frame sent by the client, or `None` once it hung up.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Next decodable event frame sent by the client.
    pub async fn recv_frame(&mut self) -> Option<EventFrame> {
        while let Some(text) = self.from_client.recv().await {
            if let Ok(frame) = EventFrame::from_json(&text) {
                return Some(frame);
            }
        }
        None
    }
}

/// Connects over WebSocket (`ws://` or `wss://`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    async fn open(endpoint: &str) -> Result<Connection, TransportError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(endpoint)
            .await
            .map_err(|e| TransportError::Connect {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        let (write, read) = ws_stream.split();
        let (tx_to_ws, rx_from_client) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let (tx_to_client, rx_from_ws) = mpsc::channel::<WireEvent>(CHANNEL_CAPACITY);

        let reader = tokio::spawn(reader_task(read, tx_to_client));
        // The writer finishes on its own once the connection drops its sender,
        // which lets it send a close frame on the way out.
        tokio::spawn(writer_task(write, rx_from_client));

        Ok(Connection::new(tx_to_ws, rx_from_ws, Some(reader)))
    }
}

impl Connector for WebSocketConnector {
    fn connect<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, Result<Connection, TransportError>> {
        Box::pin(Self::open(endpoint))
    }
}

async fn reader_task(mut read: SplitStream<WsStream>, tx: mpsc::Sender<WireEvent>) {
    loop {
        let event = match read.next().await {
            Some(Ok(Message::Text(text))) => WireEvent::Text(text),
            Some(Ok(Message::Close(frame))) => {
                let reason = frame.map_or_else(
                    || "closed by server".to_string(),
                    |f| format!("closed by server ({}): {}", u16::from(f.code), f.reason),
                );
                let _ = tx.send(WireEvent::Closed(reason)).await;
                break;
            }
            Some(Ok(other)) => {
                trace!(kind = ?other, "ignoring non-text frame");
                continue;
            }
            Some(Err(e)) => {
                let _ = tx.send(WireEvent::Closed(e.to_string())).await;
                break;
            }
            None => {
                let _ = tx
                    .send(WireEvent::Closed("connection closed".to_string()))
                    .await;
                break;
            }
        };
        if tx.send(event).await.is_err() {
            break;
        }
    }
}

async fn writer_task(mut write: SplitSink<WsStream, Message>, mut rx: mpsc::Receiver<String>) {
    while let Some(text) = rx.recv().await {
        if write.send(Message::Text(text)).await.is_err() {
            debug!("websocket write failed; stopping writer");
            return;
        }
    }
    let _ = write.close().await;
}
