use super::connection::{ConnectionId, ConnectionState, PeerConnection, TransportError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Result of one pass over the registry
#[derive(Debug, Default)]
pub struct FanOutReport {
    /// Peers the function succeeded on
    pub delivered: usize,
    /// Peers the function failed on; the caller decides whether to evict them
    pub failed: Vec<Arc<PeerConnection>>,
}

/// Live set of open peer connections, keyed by identity
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<PeerConnection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Adding the same identity twice is a no-op.
    pub async fn add(&self, connection: Arc<PeerConnection>) -> bool {
        let mut conns = self.connections.write().await;
        let id = connection.id();
        if conns.contains_key(&id) {
            return false;
        }
        conns.insert(id, connection);
        debug!(conn_id = %id, active = conns.len(), "connection registered");
        true
    }

    /// Deregister a connection. Absent identities are ignored.
    pub async fn remove(&self, id: ConnectionId) -> bool {
        let mut conns = self.connections.write().await;
        let removed = conns.remove(&id).is_some();
        if removed {
            debug!(conn_id = %id, active = conns.len(), "connection deregistered");
        }
        removed
    }

    /// Evict an Open connection after a failed write.
    ///
    /// The state change and the removal happen under one write lock: a caller
    /// cancelled while waiting for the lock leaves the connection Open and
    /// registered, never half-evicted.
    pub async fn evict(&self, connection: &PeerConnection) -> bool {
        let mut conns = self.connections.write().await;
        if !connection.mark_evicted() {
            return false;
        }
        let id = connection.id();
        conns.remove(&id);
        debug!(conn_id = %id, active = conns.len(), "connection evicted");
        true
    }

    /// Close a connection and deregister it, whatever state it was in.
    ///
    /// Returns the state the connection left.
    pub async fn close(&self, connection: &PeerConnection) -> ConnectionState {
        let mut conns = self.connections.write().await;
        let prior = connection.mark_closed();
        let id = connection.id();
        if conns.remove(&id).is_some() {
            debug!(conn_id = %id, active = conns.len(), "connection deregistered");
        }
        prior
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Apply `f` to every connection except `excluding`.
    ///
    /// Holds the read lock for the whole pass so no removal interleaves with
    /// it. A failure on one peer never stops the pass; failed peers are
    /// collected in the report instead.
    pub async fn for_each_other<F>(&self, excluding: Option<ConnectionId>, mut f: F) -> FanOutReport
    where
        F: FnMut(&PeerConnection) -> Result<(), TransportError>,
    {
        let conns = self.connections.read().await;
        let mut report = FanOutReport::default();

        for (id, conn) in conns.iter() {
            if Some(*id) == excluding {
                continue;
            }
            match f(conn.as_ref()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    debug!(conn_id = %id, error = %e, "fan-out to peer failed");
                    report.failed.push(Arc::clone(conn));
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{
        BroadcastPolicy, CloseReason, Dispatcher, Envelope, EnvelopeKind, LifecycleHandler,
        ServerClock,
    };
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn add_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = PeerConnection::channel();
        assert!(registry.add(Arc::clone(&conn)).await);
        assert!(!registry.add(conn).await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn remove_absent_is_noop() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.remove(ConnectionId::new()).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn fan_out_continues_past_failures() {
        let registry = ConnectionRegistry::new();
        let (alive, mut alive_rx) = PeerConnection::channel();
        let (dead, dead_rx) = PeerConnection::channel();
        drop(dead_rx);
        registry.add(Arc::clone(&alive)).await;
        registry.add(Arc::clone(&dead)).await;

        let report = registry
            .for_each_other(None, |conn| conn.send(Arc::from("x")))
            .await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].id(), dead.id());
        assert_eq!(&*alive_rx.recv().await.unwrap(), "x");
    }

    #[tokio::test]
    async fn fan_out_skips_excluded() {
        let registry = ConnectionRegistry::new();
        let (a, mut a_rx) = PeerConnection::channel();
        let (b, mut b_rx) = PeerConnection::channel();
        registry.add(Arc::clone(&a)).await;
        registry.add(Arc::clone(&b)).await;

        let report = registry
            .for_each_other(Some(a.id()), |conn| conn.send(Arc::from("y")))
            .await;

        assert_eq!(report.delivered, 1);
        assert!(a_rx.try_recv().is_err());
        assert_eq!(&*b_rx.recv().await.unwrap(), "y");
    }

    #[tokio::test]
    async fn close_removes_evicted_and_open_alike() {
        let registry = ConnectionRegistry::new();
        let (a, _a_rx) = PeerConnection::channel();
        let (b, _b_rx) = PeerConnection::channel();
        registry.add(Arc::clone(&a)).await;
        registry.add(Arc::clone(&b)).await;

        assert!(registry.evict(&a).await);
        assert!(!registry.evict(&a).await);
        assert_eq!(registry.close(&a).await, ConnectionState::Evicted);
        assert_eq!(registry.close(&b).await, ConnectionState::Open);
        assert_eq!(registry.close(&b).await, ConnectionState::Closed);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn cancelled_eviction_leaves_no_closed_peer_registered() {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Arc::new(ServerClock::new()),
            BroadcastPolicy::ExcludeSender,
        );
        let lifecycle = LifecycleHandler::new(dispatcher.clone(), false);
        let (a, _a_rx) = PeerConnection::channel();
        let (b, b_rx) = PeerConnection::channel();
        lifecycle.open(Arc::clone(&a)).await;
        lifecycle.open(Arc::clone(&b)).await;
        drop(b_rx);

        // The fan-out can still read, but eviction waits on the write lock
        // until the dispatch is dropped
        let guard = registry.connections.read().await;
        let dispatched = tokio::time::timeout(
            Duration::from_millis(50),
            dispatcher.dispatch(
                Some(a.id()),
                Envelope::new(EnvelopeKind::LatencyMetrics, json!({ "latency": 10 })),
            ),
        )
        .await;
        drop(guard);
        assert!(dispatched.is_err());

        assert_eq!(b.state(), ConnectionState::Open);
        assert!(
            lifecycle
                .close(&b, CloseReason::TransportError("writer gone".into()))
                .await
        );
        assert!(!registry.contains(b.id()).await);
        assert_eq!(registry.len().await, 1);
    }
}
