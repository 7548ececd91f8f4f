//! Broadcast relay core
//!
//! This module provides the pieces that move envelopes between peers:
//! - `ConnectionRegistry`: the live set of open peer connections
//! - `codec`: JSON frame decoding/encoding into typed envelopes
//! - `Dispatcher`: stamps broadcastable envelopes and fans them out
//! - `LifecycleHandler`: Open/Closed state per connection, frame handling
//! - `ServerClock`: non-decreasing millisecond timestamps

mod clock;
pub mod codec;
mod connection;
mod dispatcher;
mod envelope;
mod lifecycle;
mod registry;

pub use clock::ServerClock;
pub use codec::DecodeError;
pub use connection::{ConnectionId, ConnectionState, OutboundFrame, PeerConnection, TransportError};
pub use dispatcher::{BroadcastPolicy, DispatchOutcome, Dispatcher, DropReason};
pub use envelope::{Envelope, EnvelopeKind, OutboundEnvelope};
pub use lifecycle::{CloseReason, LifecycleHandler};
pub use registry::{ConnectionRegistry, FanOutReport};
