//! Synthetic transcription results for exercising dashboards without a
//! live audio source.

use crate::relay::{DispatchOutcome, Dispatcher, Envelope, EnvelopeKind};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

pub const DEFAULT_TEXT: &str = "Sample transcription text";

/// Body of `POST /api/simulate-transcription`; every field is optional
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SimulateTranscriptionRequest {
    pub text: Option<String>,
    pub confidence: Option<f64>,
    pub latency: Option<f64>,
}

/// The `data` object of a simulated `transcription_result`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedTranscription {
    pub text: String,
    /// 0.0 to 1.0
    pub confidence: f64,
    /// Milliseconds
    pub latency: f64,
    /// When the simulation fired, milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl SimulatedTranscription {
    /// Fill missing fields: confidence in [0.7, 1.0), latency in [50, 150) ms
    pub fn from_request<R: Rng>(request: SimulateTranscriptionRequest, rng: &mut R, timestamp: i64) -> Self {
        Self {
            text: request
                .text
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_TEXT.to_string()),
            confidence: request
                .confidence
                .unwrap_or_else(|| rng.gen_range(0.7..1.0)),
            latency: request.latency.unwrap_or_else(|| rng.gen_range(50.0..150.0)),
            timestamp,
        }
    }

    pub fn into_envelope(self) -> Envelope {
        // Plain struct of strings and numbers always serializes
        let payload = serde_json::to_value(&self).unwrap_or_default();
        Envelope::new(EnvelopeKind::TranscriptionResult, payload)
    }
}

/// Broadcast one simulated result after `delay`; the caller does not wait
pub fn spawn_simulation(
    dispatcher: Dispatcher,
    delay: Duration,
    request: SimulateTranscriptionRequest,
) -> JoinHandle<DispatchOutcome> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;

        let result = {
            let mut rng = rand::thread_rng();
            SimulatedTranscription::from_request(request, &mut rng, dispatcher.clock().now())
        };
        info!(
            text = %result.text,
            confidence = result.confidence,
            latency = result.latency,
            "broadcasting simulated transcription"
        );

        dispatcher.dispatch(None, result.into_envelope()).await
    })
}
