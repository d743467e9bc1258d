use serde::{Deserialize, Serialize};
use std::fmt;

/// Field name to dynamically-typed value, as decoded from a device payload
pub type DecodedPayload = serde_json::Map<String, serde_json::Value>;

/// Device-scoped record handed to the sink, one per inbound message
///
/// `fields` is empty (never absent) when the payload could not be decoded,
/// so the message identity survives a decode failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRecord {
    pub device_id: String,
    pub fields: DecodedPayload,
}

impl IngestRecord {
    pub fn new(device_id: impl Into<String>, fields: DecodedPayload) -> Self {
        Self {
            device_id: device_id.into(),
            fields,
        }
    }
}

impl fmt::Display for IngestRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Device: {}", self.device_id)?;

        for (key, value) in &self.fields {
            match value {
                serde_json::Value::String(s) => write!(f, "\n{} : {}", key, s)?,
                other => write!(f, "\n{} : {}", key, other)?,
            }
        }

        Ok(())
    }
}
