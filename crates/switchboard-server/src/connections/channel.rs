//! Outbound channel handle of one duplex connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use switchboard_core::TrackError;
use switchboard_core::types::new_connection_id;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Why a message could not be pushed to the writer task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The writer is alive but its buffer is saturated.
    #[error("outbound buffer full for connection '{connection_id}'")]
    Full {
        /// Id of the saturated connection.
        connection_id: String,
    },
    /// The writer task has gone away.
    #[error(transparent)]
    Closed(#[from] TrackError),
}

impl SendError {
    /// Whether the connection is gone for good.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

/// Write side of a connected socket.
///
/// Messages are pushed into the socket's writer task through a bounded
/// channel. Only a closed channel is a transport failure; a full one is
/// backpressure and the connection stays usable.
pub struct ClientChannel {
    id: String,
    tx: mpsc::Sender<Arc<String>>,
    opened_at: Instant,
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl ClientChannel {
    /// Wrap a sender with a freshly generated connection id.
    pub fn new(tx: mpsc::Sender<Arc<String>>) -> Self {
        Self::with_id(new_connection_id(), tx)
    }

    /// Wrap a sender with an explicit connection id.
    pub fn with_id(id: impl Into<String>, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id: id.into(),
            tx,
            opened_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Unique id of the underlying connection.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Push a serialized message to the writer task without waiting.
    pub fn send(&self, message: Arc<String>) -> Result<(), SendError> {
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(SendError::Full {
                    connection_id: self.id.clone(),
                })
            }
            Err(TrySendError::Closed(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(SendError::Closed(TrackError::TransportFailure {
                    connection_id: self.id.clone(),
                }))
            }
        }
    }

    /// Whether the writer task has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Messages that could not be pushed.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record a pong (or any inbound traffic).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Check and reset the alive flag for the ping cycle.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last pong or since the connection opened.
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }
}

impl std::fmt::Debug for ClientChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientChannel")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
