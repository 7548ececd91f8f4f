use super::envelope::{Envelope, EnvelopeKind, OutboundEnvelope};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

/// Decode one inbound text frame.
///
/// Expects a JSON object with a string `type` and a present `data` field.
/// An unknown `type` still decodes; it comes back as
/// [`EnvelopeKind::Unrecognized`] so the caller decides what to do with it.
pub fn decode(raw: &str) -> Result<Envelope, DecodeError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| DecodeError::MalformedFrame(format!("invalid JSON: {}", e)))?;

    let Value::Object(mut object) = value else {
        return Err(DecodeError::MalformedFrame(
            "frame is not a JSON object".to_string(),
        ));
    };

    let kind = match object.get("type") {
        Some(Value::String(kind)) => EnvelopeKind::parse(kind),
        Some(_) => {
            return Err(DecodeError::MalformedFrame(
                "`type` is not a string".to_string(),
            ))
        }
        None => return Err(DecodeError::MalformedFrame("missing `type`".to_string())),
    };

    let payload = object
        .remove("data")
        .ok_or_else(|| DecodeError::MalformedFrame("missing `data`".to_string()))?;

    Ok(Envelope::new(kind, payload))
}

/// Decode a binary frame; browsers and some native clients send JSON this way
pub fn decode_binary(raw: &[u8]) -> Result<Envelope, DecodeError> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| DecodeError::MalformedFrame("binary frame is not UTF-8".to_string()))?;
    decode(text)
}

/// Encode an outbound envelope as a text frame
pub fn encode(envelope: &OutboundEnvelope) -> String {
    json!({
        "type": envelope.kind,
        "data": envelope.data,
        "timestamp": envelope.timestamp,
    })
    .to_string()
}

/// Build the error notice sent back to a peer whose frame was dropped
pub fn error_notice(reason: &str, timestamp: i64) -> OutboundEnvelope {
    OutboundEnvelope {
        kind: "error".to_string(),
        data: json!({ "reason": reason }),
        timestamp,
    }
}
