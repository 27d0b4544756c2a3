//! A connected peer and its outbound queue.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

use crate::error::{Error, Result};

// ============================================================================
// Types
// ============================================================================

/// A queued outbound text message, shared across all recipients.
pub type Message = Arc<str>;

// ============================================================================
// ClientId
// ============================================================================

/// Process-unique client identity.
///
/// Broadcast exclusion and removal compare clients by this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    /// Allocates the next id.
    #[must_use]
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Wraps a raw id.
    #[inline]
    #[must_use]
    pub const fn from_u64(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

// ============================================================================
// Client
// ============================================================================

/// One upgraded connection registered in one room.
///
/// The socket itself is not held here: the read loop owns the read half and
/// the writer task owns the write half. The client carries the bounded
/// outbound queue feeding the writer and a closed signal that stops the
/// read loop.
pub struct Client {
    /// Identity used for exclusion and removal.
    id: ClientId,
    /// Remote network address.
    addr: SocketAddr,
    /// Room name, verbatim from the path.
    room: String,
    /// Queue sender; `None` once the client has been removed.
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
    /// Flips to `true` on removal.
    closed: watch::Sender<bool>,
}

impl Client {
    /// Creates a client and the receiving end of its queue.
    pub(crate) fn new(
        room: impl Into<String>,
        addr: SocketAddr,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));

        let client = Arc::new(Self {
            id: ClientId::next(),
            addr,
            room: room.into(),
            outbound: Mutex::new(Some(tx)),
            closed: watch::Sender::new(false),
        });

        (client, rx)
    }

    /// Returns the client id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Returns the remote address.
    #[inline]
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns the room name.
    #[inline]
    #[must_use]
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Enqueues a message without waiting.
    ///
    /// # Errors
    ///
    /// - [`Error::QueueFull`] if the queue is at capacity (drop-new policy)
    /// - [`Error::QueueClosed`] if the client has been removed
    pub fn try_send(&self, message: Message) -> Result<()> {
        let guard = self.outbound.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(Error::QueueClosed { client: self.id });
        };

        tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => Error::QueueFull { client: self.id },
            TrySendError::Closed(_) => Error::QueueClosed { client: self.id },
        })
    }

    /// Number of messages waiting in the queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.outbound
            .lock()
            .as_ref()
            .map_or(0, |tx| tx.max_capacity() - tx.capacity())
    }

    /// Closes the queue and raises the closed signal.
    ///
    /// Returns `false` if the client was already closed.
    pub(crate) fn close(&self) -> bool {
        let was_open = self.outbound.lock().take().is_some();
        self.closed.send_replace(true);
        was_open
    }

    /// Returns `true` once the client has been removed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the client has been removed.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // The sender lives in `self`, so this cannot fail while we borrow it.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("room", &self.room)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
