use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Unique identity of a peer connection, assigned at accept time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    /// Dropped from the registry after a failed write; its session has not
    /// finished yet
    Evicted,
    Closed,
}

const OPEN: u8 = 0;
const EVICTED: u8 = 1;
const CLOSED: u8 = 2;

fn state_from(raw: u8) -> ConnectionState {
    match raw {
        OPEN => ConnectionState::Open,
        EVICTED => ConnectionState::Evicted,
        _ => ConnectionState::Closed,
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The socket writer for this peer has gone away
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}

/// Outbound frames queued for a peer's socket writer
pub type OutboundFrame = Arc<str>;

/// One connected peer.
///
/// Sends never block: frames go onto an unbounded queue that the socket
/// writer task drains. A send fails only once that writer is gone.
#[derive(Debug)]
pub struct PeerConnection {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<OutboundFrame>,
    connected_at: DateTime<Utc>,
    state: AtomicU8,
}

impl PeerConnection {
    pub fn new(tx: mpsc::UnboundedSender<OutboundFrame>) -> Self {
        Self::with_id(ConnectionId::new(), tx)
    }

    pub fn with_id(id: ConnectionId, tx: mpsc::UnboundedSender<OutboundFrame>) -> Self {
        Self {
            id,
            tx,
            connected_at: Utc::now(),
            state: AtomicU8::new(OPEN),
        }
    }

    /// Create a connection together with the receiving end of its queue
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self::new(tx)), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn state(&self) -> ConnectionState {
        state_from(self.state.load(Ordering::SeqCst))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Queue a frame for this peer
    pub fn send(&self, frame: OutboundFrame) -> Result<(), TransportError> {
        self.tx
            .send(frame)
            .map_err(|_| TransportError::Closed(self.id))
    }

    /// Move Open -> Evicted.
    ///
    /// Returns `true` only for the caller that performed the transition.
    pub fn mark_evicted(&self) -> bool {
        self.state
            .compare_exchange(OPEN, EVICTED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Move to Closed from any state and return the state it left.
    pub fn mark_closed(&self) -> ConnectionState {
        state_from(self.state.swap(CLOSED, Ordering::SeqCst))
    }
}
