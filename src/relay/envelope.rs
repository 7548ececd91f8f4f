use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Envelope type carried in the `type` field of every frame
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    /// Peer-local session settings (language, API key)
    Configuration,
    /// Raw audio bytes from a capturing client
    AudioData,
    /// A finished transcription segment
    TranscriptionResult,
    /// Rolling accuracy figure
    AccuracyMetrics,
    /// Rolling latency figure
    LatencyMetrics,
    /// Anything else; keeps the raw type string for logging
    Unrecognized(String),
}

impl EnvelopeKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "configuration" => Self::Configuration,
            "audio_data" => Self::AudioData,
            "transcription_result" => Self::TranscriptionResult,
            "accuracy_metrics" => Self::AccuracyMetrics,
            "latency_metrics" => Self::LatencyMetrics,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Configuration => "configuration",
            Self::AudioData => "audio_data",
            Self::TranscriptionResult => "transcription_result",
            Self::AccuracyMetrics => "accuracy_metrics",
            Self::LatencyMetrics => "latency_metrics",
            Self::Unrecognized(raw) => raw,
        }
    }

    /// Whether envelopes of this kind are fanned out to peers
    pub fn is_broadcastable(&self) -> bool {
        matches!(
            self,
            Self::TranscriptionResult | Self::AccuracyMetrics | Self::LatencyMetrics
        )
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    /// Kind-specific data, passed through untouched
    pub payload: Value,
}

impl Envelope {
    pub fn new(kind: EnvelopeKind, payload: Value) -> Self {
        Self { kind, payload }
    }
}

/// Frame sent to peers: `{ type, data, timestamp }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    /// Server-assigned, milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl OutboundEnvelope {
    pub fn stamped(envelope: Envelope, timestamp: i64) -> Self {
        Self {
            kind: envelope.kind.as_str().to_string(),
            data: envelope.payload,
            timestamp,
        }
    }
}
