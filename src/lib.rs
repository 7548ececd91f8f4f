pub mod config;
pub mod http;
pub mod relay;
pub mod simulation;

pub use config::Config;
pub use http::{create_router, AppState};
pub use relay::{
    BroadcastPolicy, CloseReason, ConnectionId, ConnectionRegistry, ConnectionState,
    DispatchOutcome, Dispatcher, DropReason, Envelope, EnvelopeKind, LifecycleHandler,
    OutboundEnvelope, PeerConnection, ServerClock,
};
pub use simulation::{SimulateTranscriptionRequest, SimulatedTranscription};
