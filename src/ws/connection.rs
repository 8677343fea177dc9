//! A single WebSocket connection and its read loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::CoinbaseError;
use crate::ws::delivery::Frame;
use crate::ws::handler::WsHandler;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
pub(crate) type WsReceiver = SplitStream<WsStream>;

/// Upper bound on the closing handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Normal closure or the peer going away.
    Expected,
    /// Anything else: abnormal closure, protocol errors, I/O errors.
    Unexpected,
}

/// Classify a close code received from the peer.
pub fn classify_close_code(code: CloseCode) -> CloseKind {
    match code {
        CloseCode::Normal | CloseCode::Away => CloseKind::Expected,
        _ => CloseKind::Unexpected,
    }
}

/// Classify a receive error.
pub fn classify_error(error: &WsError) -> CloseKind {
    match error {
        WsError::ConnectionClosed | WsError::AlreadyClosed => CloseKind::Expected,
        _ => CloseKind::Unexpected,
    }
}

/// Lifecycle of a single socket.
///
/// A connection only moves forward: `Idle -> Connecting -> Connected -> Closed`,
/// and any state may jump to `Closed`. A closed connection is never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkState {
    Idle = 0,
    Connecting = 1,
    Connected = 2,
    Closed = 3,
}

impl LinkState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Closed,
        }
    }
}

/// One physical socket.
///
/// The sink half lives here behind a mutex so callers can write
/// concurrently with the read loop, which owns the receiving half.
pub struct Connection {
    id: u64,
    url: String,
    sink: Mutex<Option<WsSink>>,
    state: AtomicU8,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    /// A connection to `url` that has not been dialed yet.
    pub(crate) fn new(url: impl Into<String>) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            url: url.into(),
            sink: Mutex::new(None),
            state: AtomicU8::new(LinkState::Idle as u8),
        }
    }

    /// Dial, giving up after `timeout`. Returns the receiving half.
    ///
    /// Only an idle connection can be dialed. On failure the connection
    /// ends up `Closed`.
    pub(crate) async fn dial(&self, timeout: Duration) -> Result<WsReceiver, CoinbaseError> {
        if !self.advance(LinkState::Idle, LinkState::Connecting) {
            return Err(CoinbaseError::ConnectionClosed {
                reason: format!("connection {} was already dialed", self.id),
            });
        }

        let dialed = match tokio::time::timeout(timeout, connect_async(self.url.as_str())).await {
            Ok(dialed) => dialed.map_err(CoinbaseError::from),
            Err(_) => Err(CoinbaseError::ConnectTimeout(timeout)),
        };
        let (ws_stream, _) = dialed.inspect_err(|_| self.mark_closed())?;

        let (sink, receiver) = ws_stream.split();
        *self.sink.lock().await = Some(sink);

        if !self.advance(LinkState::Connecting, LinkState::Connected) {
            // Closed while the handshake was in flight.
            if let Some(mut sink) = self.sink.lock().await.take() {
                let _ = sink.close().await;
            }
            return Err(CoinbaseError::ConnectionClosed {
                reason: "closed while dialing".to_string(),
            });
        }
        Ok(receiver)
    }

    /// Process-unique identifier of this connection.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The URL this connection dials.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> LinkState {
        LinkState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the socket is still usable.
    pub fn is_live(&self) -> bool {
        self.state() == LinkState::Connected
    }

    fn advance(&self, from: LinkState, to: LinkState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn mark_closed(&self) {
        self.state.store(LinkState::Closed as u8, Ordering::Release);
    }

    /// Send one frame. UTF-8 payloads go out as text, anything else as binary.
    pub async fn write(&self, data: &[u8]) -> Result<(), CoinbaseError> {
        if !self.is_live() {
            return Err(CoinbaseError::NotConnected);
        }

        let msg = match std::str::from_utf8(data) {
            Ok(text) => WsMessage::Text(text.to_owned().into()),
            Err(_) => WsMessage::Binary(data.to_vec().into()),
        };

        let mut sink = self.sink.lock().await;
        let sink = sink.as_mut().ok_or(CoinbaseError::NotConnected)?;
        sink.send(msg).await?;
        Ok(())
    }

    /// Close the socket. Only the first call does any work.
    pub async fn close(&self) {
        let previous = self.state.swap(LinkState::Closed as u8, Ordering::AcqRel);
        if previous == LinkState::Closed as u8 {
            return;
        }

        let mut sink = self.sink.lock().await;
        let Some(sink) = sink.as_mut() else {
            return;
        };
        let closing = async {
            let _ = sink.send(WsMessage::Close(None)).await;
            let _ = sink.close().await;
        };
        if tokio::time::timeout(CLOSE_TIMEOUT, closing).await.is_err() {
            tracing::debug!(id = self.id, "closing handshake timed out");
        }
    }
}

/// Everything the read loop needs, moved into its task.
pub(crate) struct ReadLoop {
    pub conn: Arc<Connection>,
    pub receiver: WsReceiver,
    pub frames: Option<mpsc::Sender<Frame>>,
    pub triggers: mpsc::UnboundedSender<u64>,
    pub shutdown: watch::Receiver<bool>,
    pub handler: Arc<dyn WsHandler>,
    pub debug: bool,
}

impl ReadLoop {
    /// Forward frames until the socket fails, then raise one reconnect
    /// trigger (unless shutting down), notify the handler and close.
    pub(crate) async fn run(mut self) {
        let id = self.conn.id();
        let (kind, reason) = loop {
            if *self.shutdown.borrow() {
                break (CloseKind::Expected, "client shutdown".to_string());
            }

            let next = tokio::select! {
                msg = self.receiver.next() => msg,
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break (CloseKind::Expected, "client dropped".to_string());
                    }
                    continue;
                }
            };

            match next {
                Some(Ok(WsMessage::Text(text))) => self.deliver(text.as_bytes().to_vec()).await,
                Some(Ok(WsMessage::Binary(data))) => self.deliver(data.to_vec()).await,
                Some(Ok(WsMessage::Close(frame))) => break close_frame_reason(frame),
                // Pings are answered by tungstenite.
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => {}
                Some(Err(e)) => break (classify_error(&e), e.to_string()),
                None => break (CloseKind::Unexpected, "stream ended".to_string()),
            }
        };

        let closed = CoinbaseError::ConnectionClosed { reason };
        let url = self.conn.url();
        match kind {
            CloseKind::Expected => {
                crate::ws::lifecycle!(self.debug, info, id, url, error = %closed, "WebSocket closed");
            }
            CloseKind::Unexpected => {
                crate::ws::lifecycle!(
                    self.debug, warn, id, url, error = %closed, "WebSocket closed unexpectedly"
                );
            }
        }

        if !*self.shutdown.borrow() {
            // The receiver is gone only after shutdown.
            let _ = self.triggers.send(id);
        }

        self.handler.on_disconnect(&closed);
        self.conn.close().await;
    }

    async fn deliver(&mut self, frame: Frame) {
        let Some(frames) = &self.frames else {
            return;
        };
        if frames.send(frame).await.is_err() {
            tracing::debug!(id = self.conn.id(), "delivery channel closed, dropping frames");
            self.frames = None;
        }
    }
}

fn close_frame_reason(frame: Option<CloseFrame>) -> (CloseKind, String) {
    match frame {
        Some(frame) => (
            classify_close_code(frame.code),
            format!("{}: {}", u16::from(frame.code), frame.reason.as_str()),
        ),
        None => (CloseKind::Expected, "close without status".to_string()),
    }
}
