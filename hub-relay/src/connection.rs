//! Handles to live relay connections.
//!
//! A [`ConnectionHandle`] is what other parts of the relay hold to reach a
//! connection: the registry (for routing), the open-connection table (for
//! liveness sweeps) and the connection's own session. Cloning is cheap and
//! every clone observes the same open/closed status. Holding a handle never
//! keeps the transport alive.

use hub_types::{ConnectionId, ServerFrame};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Notify};

/// Work queued for a connection's session task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// An encoded frame to write to the socket.
    Frame(String),
    /// A transport-level liveness probe (WebSocket ping).
    Probe,
}

/// Why a frame could not be queued for a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The connection has closed or been terminated.
    #[error("connection closed")]
    Closed,
    /// The connection's outbound buffer is full.
    #[error("outbound buffer full")]
    Full,
    /// The frame could not be encoded.
    #[error("frame encoding failed: {0}")]
    Encode(String),
}

/// Status shared by all clones of a handle.
#[derive(Debug)]
struct LinkState {
    open: AtomicBool,
    awaiting_probe: AtomicBool,
    /// Encoded bytes sitting in the outbound queue.
    queued_bytes: AtomicUsize,
    terminate: Notify,
}

/// Cloneable handle to one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
    link: Arc<LinkState>,
    max_queued_bytes: usize,
    opened_at: Instant,
}

impl ConnectionHandle {
    /// Create a handle with a bounded outbound queue of `buffer` entries.
    ///
    /// The receiver belongs to the connection's session task. Queued bytes
    /// are not limited.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Outbound>) {
        Self::with_byte_limit(buffer, usize::MAX)
    }

    /// Create a handle whose queue holds at most `buffer` entries and at
    /// most `max_queued_bytes` of encoded frames.
    ///
    /// A frame is always accepted into an empty queue, so a single frame
    /// larger than the byte limit still gets through.
    pub fn with_byte_limit(
        buffer: usize,
        max_queued_bytes: usize,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(buffer);
        let handle = Self {
            id: ConnectionId::new(),
            tx,
            link: Arc::new(LinkState {
                open: AtomicBool::new(true),
                awaiting_probe: AtomicBool::new(false),
                queued_bytes: AtomicUsize::new(0),
                terminate: Notify::new(),
            }),
            max_queued_bytes,
            opened_at: Instant::now(),
        };
        (handle, rx)
    }

    /// The connection's id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// When the connection was accepted.
    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// Whether the connection can still receive frames.
    pub fn is_open(&self) -> bool {
        self.link.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Queue a frame without waiting.
    ///
    /// Never blocks the caller: a full buffer (by frame count or by queued
    /// bytes) is reported, not waited on.
    pub fn deliver(&self, frame: &ServerFrame) -> Result<(), DeliveryError> {
        if !self.is_open() {
            return Err(DeliveryError::Closed);
        }
        let text = frame
            .to_json()
            .map_err(|e| DeliveryError::Encode(e.to_string()))?;
        let len = text.len();

        let max = self.max_queued_bytes;
        self.link
            .queued_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |queued| {
                let next = queued.saturating_add(len);
                (queued == 0 || next <= max).then_some(next)
            })
            .map_err(|_| DeliveryError::Full)?;

        self.tx.try_send(Outbound::Frame(text)).map_err(|e| {
            self.release_queued(len);
            match e {
                mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
                mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
            }
        })
    }

    /// Record that a frame of `len` bytes has left the outbound queue.
    pub fn release_queued(&self, len: usize) {
        let _ = self
            .link
            .queued_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |queued| {
                Some(queued.saturating_sub(len))
            });
    }

    /// Encoded bytes currently waiting in the outbound queue.
    pub fn queued_bytes(&self) -> usize {
        self.link.queued_bytes.load(Ordering::Acquire)
    }

    /// Mark the connection as awaiting a probe response and queue a probe.
    ///
    /// Returns `false` if the probe could not be queued. The awaiting mark
    /// stays set either way.
    pub fn probe(&self) -> bool {
        self.link.awaiting_probe.store(true, Ordering::Release);
        self.tx.try_send(Outbound::Probe).is_ok()
    }

    /// Whether the last probe is still unanswered.
    pub fn is_awaiting_probe(&self) -> bool {
        self.link.awaiting_probe.load(Ordering::Acquire)
    }

    /// Record a probe response.
    pub fn mark_alive(&self) {
        self.link.awaiting_probe.store(false, Ordering::Release);
    }

    /// Forcibly end the connection.
    ///
    /// The session task observes this through [`terminated`](Self::terminated)
    /// and runs its close handling.
    pub fn terminate(&self) {
        self.link.open.store(false, Ordering::Release);
        self.link.terminate.notify_one();
    }

    /// Resolves once [`terminate`](Self::terminate) has been called.
    pub async fn terminated(&self) {
        self.link.terminate.notified().await;
    }

    /// Record that the transport has closed.
    pub fn mark_closed(&self) {
        self.link.open.store(false, Ordering::Release);
    }
}
