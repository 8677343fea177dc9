//! WebSocket client implementation.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{RwLock, mpsc, watch};
use url::Url;

use crate::auth::{Credentials, CredentialsProvider};
use crate::error::CoinbaseError;
use crate::ws::backoff::Backoff;
use crate::ws::channel::WsChannel;
use crate::ws::connection::{Connection, ReadLoop};
use crate::ws::delivery::{FrameStream, ReadChannel};
use crate::ws::handler::{Callbacks, WsHandler};

/// WebSocket endpoint URLs.
pub mod endpoints {
    /// Advanced Trade market data endpoint.
    pub const WS_ADVANCED_TRADE: &str = "wss://advanced-trade-ws.coinbase.com";
}

/// Configuration for the feed client.
#[derive(Clone)]
pub struct WsConfig {
    /// Endpoint override. Defaults to [`endpoints::WS_ADVANCED_TRADE`].
    pub url: Option<String>,
    /// Sink for inbound frames. Required.
    pub read_channel: Option<ReadChannel>,
    /// Subscriptions replayed, in order, on every connection.
    pub channels: Vec<WsChannel>,
    /// API key. Required.
    pub api_key: String,
    /// API secret. Required.
    pub api_secret: String,
    /// Sleep `backoff + jitter` before reconnecting.
    pub use_backoff: bool,
    /// Log connection lifecycle at info/warn instead of debug.
    pub debug: bool,
    /// Initial backoff duration for reconnection.
    pub initial_backoff: Duration,
    /// Maximum backoff duration for reconnection.
    pub max_backoff: Duration,
    /// Dial timeout.
    pub connect_timeout: Duration,
    /// Maximum consecutive failed reconnection attempts (None = infinite).
    pub max_reconnect_attempts: Option<u32>,
    handler: Option<Arc<dyn WsHandler>>,
    callbacks: Callbacks,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: None,
            read_channel: None,
            channels: Vec::new(),
            api_key: String::new(),
            api_secret: String::new(),
            use_backoff: false,
            debug: false,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(15),
            max_reconnect_attempts: None, // Infinite
            handler: None,
            callbacks: Callbacks::default(),
        }
    }
}

impl fmt::Debug for WsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsConfig")
            .field("url", &self.url)
            .field("read_channel", &self.read_channel.is_some())
            .field("channels", &self.channels)
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .field("use_backoff", &self.use_backoff)
            .field("debug", &self.debug)
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .field("connect_timeout", &self.connect_timeout)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("handler", &self.handler.is_some())
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

impl WsConfig {
    /// Configuration with the required fields set, backoff and debug logging on.
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        read_channel: ReadChannel,
        channels: Vec<WsChannel>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            read_channel: Some(read_channel),
            channels,
            use_backoff: true,
            debug: true,
            ..Default::default()
        }
    }

    /// Create a new configuration builder.
    pub fn builder() -> WsConfigBuilder {
        WsConfigBuilder::new()
    }

    fn resolved_handler(&self) -> Arc<dyn WsHandler> {
        match &self.handler {
            Some(handler) => handler.clone(),
            None => Arc::new(self.callbacks.clone()),
        }
    }

    fn validate(&self) -> Result<ReadChannel, CoinbaseError> {
        if self.api_key.is_empty() {
            return Err(CoinbaseError::MissingApiKey);
        }
        if self.api_secret.is_empty() {
            return Err(CoinbaseError::MissingApiSecret);
        }
        match &self.read_channel {
            Some(channel) if !channel.is_closed() => Ok(channel.clone()),
            _ => Err(CoinbaseError::InvalidReadChannel),
        }
    }
}

/// Builder for [`WsConfig`].
#[derive(Debug, Clone, Default)]
pub struct WsConfigBuilder {
    config: WsConfig,
}

impl WsConfigBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: WsConfig::default(),
        }
    }

    /// Override the endpoint URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = Some(url.into());
        self
    }

    /// Set the delivery channel.
    pub fn read_channel(mut self, channel: ReadChannel) -> Self {
        self.config.read_channel = Some(channel);
        self
    }

    /// Add a subscription.
    pub fn channel(mut self, channel: WsChannel) -> Self {
        self.config.channels.push(channel);
        self
    }

    /// Replace all subscriptions.
    pub fn channels(mut self, channels: Vec<WsChannel>) -> Self {
        self.config.channels = channels;
        self
    }

    /// Set the API key and secret.
    pub fn credentials(mut self, api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        self.config.api_key = api_key.into();
        self.config.api_secret = api_secret.into();
        self
    }

    /// Take the API key and secret from a credentials provider, such as
    /// [`EnvCredentials`](crate::auth::EnvCredentials).
    pub fn credentials_provider(self, provider: &impl CredentialsProvider) -> Self {
        let credentials = provider.get_credentials();
        self.credentials(credentials.api_key.clone(), credentials.expose_secret())
    }

    /// Set a handler for lifecycle events. Takes precedence over closures.
    pub fn handler(mut self, handler: Arc<dyn WsHandler>) -> Self {
        self.config.handler = Some(handler);
        self
    }

    /// Called after every successful connection, manual or automatic.
    pub fn on_connect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.config.callbacks.on_connect = Some(Arc::new(f));
        self
    }

    /// Called whenever a connection's read loop ends.
    pub fn on_disconnect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.config.callbacks.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Called after the reconnect loop restores the connection.
    pub fn on_reconnect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.config.callbacks.on_reconnect = Some(Arc::new(f));
        self
    }

    /// Called with the attempt number and error of each failed reconnection.
    pub fn on_reconnect_failed(
        mut self,
        f: impl Fn(u32, &CoinbaseError) + Send + Sync + 'static,
    ) -> Self {
        self.config.callbacks.on_reconnect_failed = Some(Arc::new(f));
        self
    }

    /// Called once the reconnect loop hits `max_reconnect_attempts`.
    pub fn on_reconnect_abandoned(
        mut self,
        f: impl Fn(&CoinbaseError) + Send + Sync + 'static,
    ) -> Self {
        self.config.callbacks.on_reconnect_abandoned = Some(Arc::new(f));
        self
    }

    /// Enable backoff with jitter before reconnecting.
    pub fn use_backoff(mut self, enabled: bool) -> Self {
        self.config.use_backoff = enabled;
        self
    }

    /// Enable verbose lifecycle logging.
    pub fn debug(mut self, enabled: bool) -> Self {
        self.config.debug = enabled;
        self
    }

    /// Set the reconnection backoff parameters.
    pub fn reconnect_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.config.initial_backoff = initial;
        self.config.max_backoff = max;
        self
    }

    /// Set the dial timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set maximum reconnection attempts.
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = Some(attempts);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> WsConfig {
        self.config
    }
}

/// Lifecycle state of a [`WsClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Idle = 0,
    Connecting = 1,
    Connected = 2,
    Reconnecting = 3,
    /// Terminal.
    ShuttingDown = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Reconnecting,
            _ => Self::ShuttingDown,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::ShuttingDown => "shutting down",
        };
        f.write_str(name)
    }
}

/// Who asked for a dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dial {
    Manual,
    Reconnect,
}

/// State shared by the client handle and its background tasks.
struct Inner {
    url: StdMutex<String>,
    channels: Vec<WsChannel>,
    credentials: Credentials,
    handler: Arc<dyn WsHandler>,
    read_channel: ReadChannel,
    active: RwLock<Option<Arc<Connection>>>,
    state: AtomicU8,
    backoff: StdMutex<Backoff>,
    /// Set while the reconnect loop is retrying.
    reconnecting: AtomicBool,
    shutdown: watch::Sender<bool>,
    triggers: mpsc::UnboundedSender<u64>,
    use_backoff: bool,
    debug: bool,
    connect_timeout: Duration,
    max_reconnect_attempts: Option<u32>,
}

impl Inner {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn is_shutting_down(&self) -> bool {
        self.state() == ConnectionState::ShuttingDown
    }

    /// Move to `next` unless shutting down. Returns false if shutting down.
    fn transition(&self, next: ConnectionState) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != ConnectionState::ShuttingDown as u8).then_some(next as u8)
            })
            .is_ok()
    }

    fn last_url(&self) -> String {
        self.url.lock().map(|url| url.clone()).unwrap_or_default()
    }

    fn with_backoff<T>(&self, f: impl FnOnce(&mut Backoff) -> T) -> T {
        let mut backoff = self.backoff.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut backoff)
    }

    async fn active_connection(&self) -> Option<Arc<Connection>> {
        self.active.read().await.clone()
    }

    async fn has_live_connection(&self) -> bool {
        self.active
            .read()
            .await
            .as_ref()
            .is_some_and(|conn| conn.is_live())
    }

    /// State after a failed manual dial: whatever the live connection says,
    /// or the reconnect loop if it is still retrying.
    async fn settle(&self) {
        let next = if self.has_live_connection().await {
            ConnectionState::Connected
        } else if self.reconnecting.load(Ordering::Acquire) {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Idle
        };
        self.transition(next);
    }

    /// Remove the active connection if it is `id`.
    async fn take_if_current(&self, id: u64) -> Option<Arc<Connection>> {
        let mut active = self.active.write().await;
        match active.as_ref() {
            Some(conn) if conn.id() == id => active.take(),
            _ => None,
        }
    }

    /// Dial, replay subscriptions, notify and start the read loop.
    ///
    /// A manual dial replaces any live connection. A reconnect dial backs
    /// off instead and returns `Ok(false)` when a live connection is
    /// already installed.
    async fn establish(&self, url: &str, origin: Dial) -> Result<bool, CoinbaseError> {
        let url = Url::parse(url)?;
        if self.is_shutting_down() {
            return Err(CoinbaseError::ShuttingDown);
        }

        lifecycle!(self.debug, info, %url, ?origin, "dialing");
        let conn = Arc::new(Connection::new(url.as_str()));
        let receiver = conn.dial(self.connect_timeout).await?;

        // Publish under the lock: shutdown either takes this connection or
        // is observed here.
        let previous = {
            let mut active = self.active.write().await;
            if self.is_shutting_down() {
                drop(active);
                conn.close().await;
                return Err(CoinbaseError::ShuttingDown);
            }
            if origin == Dial::Reconnect && active.as_ref().is_some_and(|c| c.is_live()) {
                drop(active);
                conn.close().await;
                return Ok(false);
            }
            active.replace(conn.clone())
        };
        if let Some(previous) = previous {
            previous.close().await;
        }

        if let Err(e) = self.subscribe_all(&conn).await {
            self.take_if_current(conn.id()).await;
            conn.close().await;
            return Err(e);
        }

        if let Ok(mut last) = self.url.lock() {
            *last = url.to_string();
        }
        self.with_backoff(Backoff::reset);
        if !self.transition(ConnectionState::Connected) {
            return Err(CoinbaseError::ShuttingDown);
        }
        lifecycle!(self.debug, info, id = conn.id(), "connected");
        self.handler.on_connect();

        let read_loop = ReadLoop {
            conn: conn.clone(),
            receiver,
            frames: self.read_channel.sender(),
            triggers: self.triggers.clone(),
            shutdown: self.shutdown.subscribe(),
            handler: self.handler.clone(),
            debug: self.debug,
        };
        tokio::spawn(read_loop.run());

        Ok(true)
    }

    /// Send every configured subscription, signed now, in order.
    async fn subscribe_all(&self, conn: &Connection) -> Result<(), CoinbaseError> {
        for channel in &self.channels {
            let frame = channel.marshal(&self.credentials)?;
            conn.write(&frame).await?;
            lifecycle!(self.debug, info, channel = %channel.channel, "subscription sent");
        }
        Ok(())
    }
}

/// Coinbase Advanced Trade WebSocket feed client.
///
/// Owns one logical connection. Inbound frames are forwarded to the
/// configured [`ReadChannel`]; when the socket drops, a background task
/// redials and replays every subscription with fresh signatures.
///
/// # Example
///
/// ```rust,ignore
/// use coinbase_ws_feed::ws::{ReadChannel, WsChannel, WsClient, WsConfig};
/// use futures_util::StreamExt;
///
/// let frames = ReadChannel::bounded(64);
/// let config = WsConfig::builder()
///     .credentials("api_key", "api_secret")
///     .read_channel(frames.clone())
///     .channel(WsChannel::ticker(["BTC-USD"]))
///     .use_backoff(true)
///     .build();
///
/// let client = WsClient::new(config)?;
/// client.connect().await?;
///
/// let mut stream = frames.take_stream().unwrap();
/// while let Some(frame) = stream.next().await {
///     println!("{}", String::from_utf8_lossy(&frame));
/// }
/// ```
pub struct WsClient {
    inner: Arc<Inner>,
}

impl fmt::Debug for WsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsClient")
            .field("url", &self.inner.last_url())
            .field("state", &self.inner.state())
            .field("channels", &self.inner.channels.len())
            .finish()
    }
}

impl WsClient {
    /// Validate `config` and start the reconnect task. Does not dial.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(config: WsConfig) -> Result<Self, CoinbaseError> {
        let read_channel = config.validate()?;
        let handler = config.resolved_handler();

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (triggers, triggers_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            url: StdMutex::new(
                config
                    .url
                    .unwrap_or_else(|| endpoints::WS_ADVANCED_TRADE.to_string()),
            ),
            channels: config.channels,
            credentials: Credentials::new(config.api_key, config.api_secret),
            handler,
            read_channel,
            active: RwLock::new(None),
            state: AtomicU8::new(ConnectionState::Idle as u8),
            backoff: StdMutex::new(Backoff::new(config.initial_backoff, config.max_backoff)),
            reconnecting: AtomicBool::new(false),
            shutdown,
            triggers,
            use_backoff: config.use_backoff,
            debug: config.debug,
            connect_timeout: config.connect_timeout,
            max_reconnect_attempts: config.max_reconnect_attempts,
        });

        tokio::spawn(reconnect_loop(inner.clone(), triggers_rx, shutdown_rx));

        Ok(Self { inner })
    }

    /// Connect to the configured (or last used) URL.
    pub async fn connect(&self) -> Result<(), CoinbaseError> {
        let url = self.inner.last_url();
        self.connect_with_url(&url).await
    }

    /// Connect to `url`, which becomes the URL used for reconnection.
    ///
    /// A live connection is replaced. Failures are returned as-is and do
    /// not start the reconnect loop.
    pub async fn connect_with_url(&self, url: &str) -> Result<(), CoinbaseError> {
        if !self.inner.transition(ConnectionState::Connecting) {
            return Err(CoinbaseError::ShuttingDown);
        }

        match self.inner.establish(url, Dial::Manual).await {
            Ok(_) => Ok(()),
            Err(e) => {
                lifecycle!(self.inner.debug, warn, error = %e, "connect failed");
                self.inner.settle().await;
                Err(e)
            }
        }
    }

    /// Send one frame on the active connection.
    pub async fn write(&self, data: impl AsRef<[u8]>) -> Result<(), CoinbaseError> {
        let conn = self
            .inner
            .active_connection()
            .await
            .ok_or(CoinbaseError::NotConnected)?;
        conn.write(data.as_ref()).await
    }

    /// Stop the client: end the reconnect task, close the delivery channel
    /// and the socket.
    ///
    /// Only the first call has any effect. An in-flight dial or a blocked
    /// frame handoff is left to finish on its own.
    pub async fn shutdown(&self) {
        let previous = self
            .inner
            .state
            .swap(ConnectionState::ShuttingDown as u8, Ordering::AcqRel);
        if previous == ConnectionState::ShuttingDown as u8 {
            return;
        }

        lifecycle!(self.inner.debug, info, "shutting down");
        self.inner.shutdown.send_replace(true);
        self.inner.read_channel.close();

        let conn = self.inner.active.write().await.take();
        if let Some(conn) = conn {
            conn.close().await;
        }
    }

    /// Take the delivery channel's receiving half as a stream.
    ///
    /// Returns `None` if it was already taken or the channel was built from
    /// a bare sender.
    pub fn read_chan(&self) -> Option<FrameStream> {
        self.inner.read_channel.take_stream()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Whether a connection is currently live.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// URL used by [`WsClient::connect`] and by reconnection.
    pub fn url(&self) -> String {
        self.inner.last_url()
    }

    /// Base delay the next reconnection attempt waits, before jitter.
    pub fn reconnect_backoff(&self) -> Duration {
        self.inner.with_backoff(|b| b.current())
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        // Let the background tasks wind down; sockets are closed by their
        // read loops.
        self.inner
            .state
            .store(ConnectionState::ShuttingDown as u8, Ordering::Release);
        self.inner.shutdown.send_replace(true);
        self.inner.read_channel.close();
    }
}

async fn wait_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Wait for reconnect triggers and redial until cancelled.
async fn reconnect_loop(
    inner: Arc<Inner>,
    mut triggers: mpsc::UnboundedReceiver<u64>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let id = tokio::select! {
            biased;
            _ = wait_shutdown(&mut shutdown) => break,
            trigger = triggers.recv() => match trigger {
                Some(id) => id,
                None => break,
            },
        };

        if inner.is_shutting_down() {
            break;
        }
        let Some(stale) = inner.take_if_current(id).await else {
            tracing::trace!(id, "ignoring trigger from superseded connection");
            continue;
        };
        stale.close().await;

        if !inner.transition(ConnectionState::Reconnecting) {
            break;
        }
        inner.reconnecting.store(true, Ordering::Release);
        let running = reconnect(&inner, &mut shutdown).await;
        inner.reconnecting.store(false, Ordering::Release);
        if !running {
            break;
        }
    }

    lifecycle!(inner.debug, info, "reconnect loop stopped");
}

/// Redial until success, shutdown, or the attempt limit.
///
/// Returns false if the client shut down meanwhile.
async fn reconnect(inner: &Arc<Inner>, shutdown: &mut watch::Receiver<bool>) -> bool {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;

        // The first attempt after a drop is immediate unless backoff is on;
        // later attempts always wait so a dead endpoint is not hammered.
        let delay = if inner.use_backoff {
            Some(inner.with_backoff(|b| b.delay(true)))
        } else if attempt > 1 {
            Some(inner.with_backoff(|b| b.delay(false)))
        } else {
            None
        };

        if let Some(delay) = delay {
            lifecycle!(inner.debug, info, attempt, ?delay, "waiting before reconnect");
            tokio::select! {
                biased;
                _ = wait_shutdown(shutdown) => return false,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if inner.is_shutting_down() {
            return false;
        }
        // A manual connect may have restored the feed while we slept.
        if inner.has_live_connection().await {
            lifecycle!(inner.debug, info, attempt, "connection already restored");
            return true;
        }

        let url = inner.last_url();
        match inner.establish(&url, Dial::Reconnect).await {
            Ok(true) => {
                lifecycle!(inner.debug, info, attempt, "reconnected");
                inner.handler.on_reconnect();
                return true;
            }
            Ok(false) => {
                lifecycle!(inner.debug, info, attempt, "connection already restored");
                return true;
            }
            Err(CoinbaseError::ShuttingDown) => return false,
            Err(e) => {
                lifecycle!(inner.debug, warn, attempt, error = %e, "reconnection attempt failed");
                // Without backoff the first attempt did not wait, so the
                // first retry waits the initial delay.
                if inner.use_backoff || attempt > 1 {
                    inner.with_backoff(Backoff::advance);
                }
                inner.handler.on_reconnect_failed(attempt, &e);

                if inner.max_reconnect_attempts.is_some_and(|max| attempt >= max) {
                    tracing::warn!(attempts = attempt, error = %e, "giving up on reconnection");
                    inner.transition(ConnectionState::Idle);
                    let abandoned = CoinbaseError::ReconnectAbandoned {
                        attempts: attempt,
                        last: Box::new(e),
                    };
                    inner.handler.on_reconnect_abandoned(&abandoned);
                    return true;
                }
            }
        }
    }
}
