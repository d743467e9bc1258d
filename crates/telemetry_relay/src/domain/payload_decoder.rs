use common::domain::DecodedPayload;
use serde_json::Value;
use tracing::{debug, warn};

/// Longest payload prefix included in decode diagnostics
pub const PAYLOAD_EXCERPT_LIMIT: usize = 256;

/// Decodes raw message bodies into a field map
///
/// Implementations must not fail: input that cannot be decoded yields an
/// empty map and a warning, so one bad device payload never stops ingestion.
#[cfg_attr(test, mockall::automock)]
pub trait PayloadDecoder: Send + Sync {
    fn decode(&self, payload: &[u8]) -> DecodedPayload;
}

/// Decoder for JSON payloads whose top level is an object
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonPayloadDecoder;

impl JsonPayloadDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl PayloadDecoder for JsonPayloadDecoder {
    fn decode(&self, payload: &[u8]) -> DecodedPayload {
        match serde_json::from_slice::<Value>(payload) {
            Ok(Value::Object(fields)) => {
                debug!(field_count = fields.len(), "decoded payload");
                fields
            }
            Ok(other) => {
                warn!(
                    kind = value_kind(&other),
                    payload = %payload_excerpt(payload),
                    "payload is not a JSON object, forwarding empty field set"
                );
                DecodedPayload::new()
            }
            Err(e) => {
                warn!(
                    error = %e,
                    payload = %payload_excerpt(payload),
                    "unable to parse payload, forwarding empty field set"
                );
                DecodedPayload::new()
            }
        }
    }
}

/// Lossy UTF-8 rendering of at most `PAYLOAD_EXCERPT_LIMIT` payload bytes
pub fn payload_excerpt(payload: &[u8]) -> String {
    let end = payload.len().min(PAYLOAD_EXCERPT_LIMIT);
    let mut excerpt = String::from_utf8_lossy(&payload[..end]).into_owned();
    if payload.len() > PAYLOAD_EXCERPT_LIMIT {
        excerpt.push_str("...");
    }
    excerpt
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
