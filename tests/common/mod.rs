#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use coinbase_ws_feed::CoinbaseError;
use coinbase_ws_feed::ws::WsHandler;

pub const TEST_KEY: &str = "test_key";
pub const TEST_SECRET: &str = "test_secret";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A text frame received by the server, tagged with the connection index.
#[derive(Debug, Clone)]
pub struct Received {
    pub connection: usize,
    pub text: String,
}

/// In-process WebSocket server that records inbound frames and can drop
/// every open connection without a closing handshake.
pub struct TestServer {
    pub url: String,
    received: mpsc::UnboundedReceiver<Received>,
    kick: broadcast::Sender<()>,
    push: broadcast::Sender<String>,
    accepted: Arc<AtomicUsize>,
    refusing: Arc<AtomicBool>,
    stop: Option<oneshot::Sender<()>>,
    acceptor: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let (received_tx, received) = mpsc::unbounded_channel();
        let (kick, _) = broadcast::channel(16);
        let (push, _) = broadcast::channel(64);
        let (stop, mut stop_rx) = oneshot::channel();
        let accepted = Arc::new(AtomicUsize::new(0));
        let refusing = Arc::new(AtomicBool::new(false));

        let kick_tx = kick.clone();
        let push_tx = push.clone();
        let counter = accepted.clone();
        let refuse = refusing.clone();
        let acceptor = tokio::spawn(async move {
            loop {
                let (stream, _) = tokio::select! {
                    _ = &mut stop_rx => return,
                    accepted = listener.accept() => match accepted {
                        Ok(conn) => conn,
                        Err(_) => return,
                    },
                };
                if refuse.load(Ordering::SeqCst) {
                    // Drop the socket before the upgrade so the dial fails.
                    drop(stream);
                    continue;
                }
                let index = counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(
                    stream,
                    index,
                    received_tx.clone(),
                    kick_tx.subscribe(),
                    push_tx.subscribe(),
                ));
            }
        });

        Self {
            url,
            received,
            kick,
            push,
            accepted,
            refusing,
            stop: Some(stop),
            acceptor: Some(acceptor),
        }
    }

    /// Drop all open connections abruptly.
    pub fn kick(&self) {
        let _ = self.kick.send(());
    }

    /// Send a text frame to every open connection.
    pub fn push(&self, text: &str) {
        let _ = self.push.send(text.to_string());
    }

    /// Fail every WebSocket upgrade while `refusing` is set.
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Stop accepting, release the port, then drop all open connections.
    pub async fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.await;
        }
        self.kick();
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Next frame received by the server.
    pub async fn next_frame(&mut self) -> Received {
        tokio::time::timeout(Duration::from_secs(5), self.received.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("server stopped")
    }

    /// Next `count` frames received by the server.
    pub async fn next_frames(&mut self, count: usize) -> Vec<Received> {
        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            frames.push(self.next_frame().await);
        }
        frames
    }

    /// Whether any frame arrives within `wait`.
    pub async fn idle_for(&mut self, wait: Duration) -> bool {
        tokio::time::timeout(wait, self.received.recv()).await.is_err()
    }
}

async fn serve(
    stream: TcpStream,
    connection: usize,
    received: mpsc::UnboundedSender<Received>,
    mut kick: broadcast::Receiver<()>,
    mut push: broadcast::Receiver<String>,
) {
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };

    loop {
        tokio::select! {
            msg = ws.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let _ = received.send(Received {
                        connection,
                        text: text.to_string(),
                    });
                }
                Some(Ok(_)) => {}
                _ => return,
            },
            // Dropping the socket closes TCP without a close frame.
            _ = kick.recv() => return,
            text = push.recv() => {
                if let Ok(text) = text {
                    let _ = ws.send(Message::Text(text.into())).await;
                }
            }
        }
    }
}

/// Counts lifecycle callbacks.
#[derive(Debug, Default)]
pub struct Recorder {
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub reconnects: AtomicUsize,
    pub failures: AtomicUsize,
    pub abandoned: AtomicUsize,
    pub abandoned_after: AtomicU32,
    failure_times: std::sync::Mutex<Vec<Instant>>,
    disconnect_reasons: std::sync::Mutex<Vec<String>>,
}

impl Recorder {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    pub fn failure_times(&self) -> Vec<Instant> {
        self.failure_times.lock().unwrap().clone()
    }

    pub fn disconnect_reasons(&self) -> Vec<String> {
        self.disconnect_reasons.lock().unwrap().clone()
    }
}

impl WsHandler for Recorder {
    fn on_connect(&self) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    fn on_disconnect(&self, error: &CoinbaseError) {
        if let CoinbaseError::ConnectionClosed { reason } = error {
            self.disconnect_reasons.lock().unwrap().push(reason.clone());
        }
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn on_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn on_reconnect_failed(&self, _attempt: u32, _error: &CoinbaseError) {
        self.failure_times.lock().unwrap().push(Instant::now());
        self.failures.fetch_add(1, Ordering::SeqCst);
    }

    fn on_reconnect_abandoned(&self, error: &CoinbaseError) {
        if let CoinbaseError::ReconnectAbandoned { attempts, .. } = error {
            self.abandoned_after.store(*attempts, Ordering::SeqCst);
        }
        self.abandoned.fetch_add(1, Ordering::SeqCst);
    }
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    wait_for(Duration::from_secs(5), condition).await
}

/// Poll `condition` until it holds or `limit` passes.
pub async fn wait_for(limit: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
