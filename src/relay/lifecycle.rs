use super::codec::{self, DecodeError};
use super::connection::{ConnectionState, PeerConnection};
use super::dispatcher::{DispatchOutcome, Dispatcher, DropReason};
use super::envelope::Envelope;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why a connection left the Open state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer sent a close frame or the stream ended
    ClientClosed,
    /// A read or write on the socket failed
    TransportError(String),
    /// The peer stopped answering pings
    HeartbeatTimeout,
    /// The server is shutting down
    ServerShutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientClosed => f.write_str("client closed"),
            Self::TransportError(e) => write!(f, "transport error: {}", e),
            Self::HeartbeatTimeout => f.write_str("heartbeat timeout"),
            Self::ServerShutdown => f.write_str("server shutdown"),
        }
    }
}

/// Drives a connection through Open -> Closed and feeds its frames to the
/// dispatcher
#[derive(Debug, Clone)]
pub struct LifecycleHandler {
    dispatcher: Dispatcher,
    notify_malformed: bool,
}

impl LifecycleHandler {
    pub fn new(dispatcher: Dispatcher, notify_malformed: bool) -> Self {
        Self {
            dispatcher,
            notify_malformed,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Register a freshly accepted connection
    pub async fn open(&self, connection: Arc<PeerConnection>) {
        let id = connection.id();
        self.dispatcher.registry().add(connection).await;
        info!(conn_id = %id, "new WebSocket connection");
    }

    /// Handle one inbound text frame from `connection`
    pub async fn handle_frame(&self, connection: &PeerConnection, raw: &str) -> DispatchOutcome {
        self.handle_decoded(connection, codec::decode(raw)).await
    }

    /// Handle one inbound binary frame from `connection`
    pub async fn handle_binary(&self, connection: &PeerConnection, raw: &[u8]) -> DispatchOutcome {
        self.handle_decoded(connection, codec::decode_binary(raw)).await
    }

    async fn handle_decoded(
        &self,
        connection: &PeerConnection,
        decoded: Result<Envelope, DecodeError>,
    ) -> DispatchOutcome {
        match decoded {
            Ok(envelope) => {
                debug!(conn_id = %connection.id(), kind = %envelope.kind, "received envelope");
                self.dispatcher.dispatch(Some(connection.id()), envelope).await
            }
            Err(DecodeError::MalformedFrame(reason)) => {
                warn!(conn_id = %connection.id(), %reason, "error parsing message");
                if self.notify_malformed {
                    let notice = codec::error_notice(&reason, self.dispatcher.clock().now());
                    // A failed notice means the peer is already going away
                    let _ = connection.send(Arc::from(codec::encode(&notice)));
                }
                DispatchOutcome::Dropped(DropReason::Malformed(reason))
            }
        }
    }

    /// Move `connection` to Closed and deregister it.
    ///
    /// Safe to call any number of times, concurrently or not. Returns whether
    /// this call ended the connection; a peer already evicted by a failed
    /// fan-out write still ends here, so its disconnect is logged once.
    pub async fn close(&self, connection: &PeerConnection, reason: CloseReason) -> bool {
        let id = connection.id();
        let evicted = match self.dispatcher.registry().close(connection).await {
            ConnectionState::Closed => {
                debug!(conn_id = %id, %reason, "connection already closed");
                return false;
            }
            ConnectionState::Evicted => true,
            ConnectionState::Open => false,
        };

        match reason {
            CloseReason::TransportError(_) | CloseReason::HeartbeatTimeout => {
                warn!(conn_id = %id, %reason, evicted, "client disconnected")
            }
            _ => info!(conn_id = %id, %reason, evicted, "client disconnected"),
        }
        true
    }
}
