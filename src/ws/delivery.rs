//! Delivery channel between the read loop and the consumer.
//!
//! The channel is a bounded `tokio::sync::mpsc` queue. The read loop awaits
//! each send, so once `capacity` frames are waiting the read loop stops
//! reading from the socket until the consumer catches up. A capacity of 1
//! gives the tightest backpressure tokio offers.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// A raw inbound frame.
pub type Frame = Vec<u8>;

/// Stream of inbound frames handed to the consumer.
pub type FrameStream = ReceiverStream<Frame>;

/// Consumer-owned sink for inbound frames.
///
/// Clones share the same queue. The receiving half can be taken exactly once,
/// either directly from this handle or through
/// [`WsClient::read_chan`](crate::ws::WsClient::read_chan).
#[derive(Debug, Clone)]
pub struct ReadChannel {
    inner: Arc<Halves>,
}

#[derive(Debug)]
struct Halves {
    tx: Mutex<Option<mpsc::Sender<Frame>>>,
    rx: Mutex<Option<mpsc::Receiver<Frame>>>,
}

impl ReadChannel {
    /// Create a channel buffering up to `capacity` frames (minimum 1).
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self::from_parts(tx, Some(rx))
    }

    fn from_parts(tx: mpsc::Sender<Frame>, rx: Option<mpsc::Receiver<Frame>>) -> Self {
        Self {
            inner: Arc::new(Halves {
                tx: Mutex::new(Some(tx)),
                rx: Mutex::new(rx),
            }),
        }
    }

    /// Take the receiving half as a stream.
    ///
    /// Returns `None` if it was already taken, or if the channel was built
    /// from a bare sender.
    pub fn take_stream(&self) -> Option<FrameStream> {
        self.take_receiver().map(ReceiverStream::new)
    }

    /// Take the receiving half.
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<Frame>> {
        self.inner.rx.lock().ok()?.take()
    }

    /// Whether the channel can no longer carry frames, either because it
    /// was closed by the client or because the receiving half was dropped.
    pub fn is_closed(&self) -> bool {
        self.sender().is_none_or(|tx| tx.is_closed())
    }

    /// A sender for the read loop, or `None` once closed.
    pub(crate) fn sender(&self) -> Option<mpsc::Sender<Frame>> {
        self.inner.tx.lock().ok()?.clone()
    }

    /// Drop the shared sender. The consumer sees end-of-stream once every
    /// read loop holding a clone has exited.
    pub(crate) fn close(&self) {
        if let Ok(mut tx) = self.inner.tx.lock() {
            tx.take();
        }
    }
}

impl From<mpsc::Sender<Frame>> for ReadChannel {
    /// Wrap a sender whose receiver the consumer already holds.
    fn from(tx: mpsc::Sender<Frame>) -> Self {
        Self::from_parts(tx, None)
    }
}
