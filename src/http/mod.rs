//! HTTP and WebSocket surface
//!
//! - GET / and GET /ws - Upgrade to a relay WebSocket
//! - GET /api/health - Health check
//! - GET /api/connections - Number of open WebSocket connections
//! - POST /api/simulate-transcription - Broadcast a synthetic transcription result

mod handlers;
mod routes;
mod state;
pub mod ws;

pub use handlers::{ConnectionsResponse, HealthResponse, SimulationResponse};
pub use routes::create_router;
pub use state::AppState;
