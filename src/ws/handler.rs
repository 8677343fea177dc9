//! Lifecycle callbacks.

use std::fmt;
use std::sync::Arc;

use crate::error::CoinbaseError;

/// Receives connection lifecycle notifications.
///
/// Every method defaults to a no-op. Callbacks run on the client's
/// background tasks and should return quickly.
pub trait WsHandler: Send + Sync {
    /// A connection was established and all channels were subscribed.
    fn on_connect(&self) {}

    /// A connection's read loop ended. `error` is a
    /// [`CoinbaseError::ConnectionClosed`] carrying the close reason.
    fn on_disconnect(&self, _error: &CoinbaseError) {}

    /// The reconnect loop re-established the connection.
    fn on_reconnect(&self) {}

    /// A reconnection attempt failed. `attempt` starts at 1.
    fn on_reconnect_failed(&self, _attempt: u32, _error: &CoinbaseError) {}

    /// The reconnect loop gave up. `error` is a
    /// [`CoinbaseError::ReconnectAbandoned`] wrapping the last failure.
    fn on_reconnect_abandoned(&self, _error: &CoinbaseError) {}
}

/// A handler that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl WsHandler for NoopHandler {}

type Callback = Arc<dyn Fn() + Send + Sync>;
type FailureCallback = Arc<dyn Fn(u32, &CoinbaseError) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&CoinbaseError) + Send + Sync>;

/// Closure-based handler assembled by the config builder.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub(crate) on_connect: Option<Callback>,
    pub(crate) on_disconnect: Option<Callback>,
    pub(crate) on_reconnect: Option<Callback>,
    pub(crate) on_reconnect_failed: Option<FailureCallback>,
    pub(crate) on_reconnect_abandoned: Option<ErrorCallback>,
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_reconnect", &self.on_reconnect.is_some())
            .field("on_reconnect_failed", &self.on_reconnect_failed.is_some())
            .field("on_reconnect_abandoned", &self.on_reconnect_abandoned.is_some())
            .finish()
    }
}

impl WsHandler for Callbacks {
    fn on_connect(&self) {
        if let Some(f) = &self.on_connect {
            f();
        }
    }

    fn on_disconnect(&self, _error: &CoinbaseError) {
        if let Some(f) = &self.on_disconnect {
            f();
        }
    }

    fn on_reconnect(&self) {
        if let Some(f) = &self.on_reconnect {
            f();
        }
    }

    fn on_reconnect_failed(&self, attempt: u32, error: &CoinbaseError) {
        if let Some(f) = &self.on_reconnect_failed {
            f(attempt, error);
        }
    }

    fn on_reconnect_abandoned(&self, error: &CoinbaseError) {
        if let Some(f) = &self.on_reconnect_abandoned {
            f(error);
        }
    }
}
