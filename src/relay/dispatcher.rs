use super::clock::ServerClock;
use super::codec;
use super::connection::ConnectionId;
use super::envelope::{Envelope, EnvelopeKind, OutboundEnvelope};
use super::registry::ConnectionRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Whether a broadcast goes back to the connection that sent it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastPolicy {
    /// Every open connection receives the envelope, the sender included
    #[default]
    IncludeSender,
    /// Every open connection except the sender receives the envelope
    ExcludeSender,
}

/// Why a frame was dropped without being broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The frame could not be decoded
    Malformed(String),
    /// The frame decoded but its `type` is not one we know
    UnknownKind(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Fanned out; `evicted` peers failed the write and were deregistered
    Broadcast { delivered: usize, evicted: usize },
    /// Recognized but not broadcast
    Accepted(EnvelopeKind),
    Dropped(DropReason),
}

/// Routes decoded envelopes to the registry's fan-out
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    clock: Arc<ServerClock>,
    policy: BroadcastPolicy,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        clock: Arc<ServerClock>,
        policy: BroadcastPolicy,
    ) -> Self {
        Self {
            registry,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> BroadcastPolicy {
        self.policy
    }

    pub fn clock(&self) -> &ServerClock {
        &self.clock
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Dispatch an envelope received from `source`.
    ///
    /// `source` is `None` for envelopes originating in the server itself.
    pub async fn dispatch(&self, source: Option<ConnectionId>, envelope: Envelope) -> DispatchOutcome {
        if envelope.kind.is_broadcastable() {
            return self.broadcast(source, envelope).await;
        }

        match envelope.kind {
            EnvelopeKind::Configuration => {
                info!(source = ?source, "received configuration");
                DispatchOutcome::Accepted(EnvelopeKind::Configuration)
            }
            EnvelopeKind::AudioData => {
                debug!(source = ?source, "received audio data, not relayed");
                DispatchOutcome::Accepted(EnvelopeKind::AudioData)
            }
            EnvelopeKind::Unrecognized(raw) => {
                info!(source = ?source, kind = %raw, "unknown message type");
                DispatchOutcome::Dropped(DropReason::UnknownKind(raw))
            }
            other => DispatchOutcome::Accepted(other),
        }
    }

    async fn broadcast(&self, source: Option<ConnectionId>, envelope: Envelope) -> DispatchOutcome {
        let kind = envelope.kind.clone();
        let outbound = OutboundEnvelope::stamped(envelope, self.clock.now());
        let frame: Arc<str> = Arc::from(codec::encode(&outbound));

        let excluding = match self.policy {
            BroadcastPolicy::IncludeSender => None,
            BroadcastPolicy::ExcludeSender => source,
        };

        let report = self
            .registry
            .for_each_other(excluding, |conn| conn.send(Arc::clone(&frame)))
            .await;

        let mut evicted = 0;
        for conn in report.failed {
            // Peers already closed by their own session are not counted
            if self.registry.evict(&conn).await {
                warn!(conn_id = %conn.id(), "evicted unwritable connection");
                evicted += 1;
            }
        }

        debug!(
            kind = %kind,
            delivered = report.delivered,
            evicted,
            "broadcast envelope"
        );

        DispatchOutcome::Broadcast {
            delivered: report.delivered,
            evicted,
        }
    }
}
