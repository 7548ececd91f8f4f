use super::state::AppState;
use crate::simulation::{self, SimulateTranscriptionRequest};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use tracing::info;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionsResponse {
    pub active_connections: usize,
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
pub struct SimulationResponse {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/health
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            timestamp: state.dispatcher().clock().now(),
        }),
    )
}

/// GET /api/connections
/// Number of currently open WebSocket connections
pub async fn active_connections(State(state): State<AppState>) -> impl IntoResponse {
    let active_connections = state.registry().len().await;

    (
        StatusCode::OK,
        Json(ConnectionsResponse {
            active_connections,
            timestamp: state.dispatcher().clock().now(),
        }),
    )
}

/// POST /api/simulate-transcription
/// Broadcast a synthetic transcription result after the configured delay.
/// Responds immediately; the broadcast happens in the background.
pub async fn simulate_transcription(
    State(state): State<AppState>,
    payload: Option<Json<SimulateTranscriptionRequest>>,
) -> impl IntoResponse {
    if !state.simulation.enabled {
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "Simulation is disabled".to_string(),
            }),
        )
            .into_response();
    }

    let request = payload.map(|Json(req)| req).unwrap_or_default();
    info!("Simulation requested: {:?}", request);

    simulation::spawn_simulation(
        state.dispatcher().clone(),
        state.simulation.delay(),
        request,
    );

    (
        StatusCode::OK,
        Json(SimulationResponse {
            status: "simulation_started".to_string(),
        }),
    )
        .into_response()
}
