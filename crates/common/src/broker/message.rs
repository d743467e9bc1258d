use bytes::Bytes;
use std::collections::BTreeMap;

/// Raw northbound message, with broker metadata already extracted
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub device_id: String,
    pub content_type: Option<String>,
    pub payload: Bytes,
    pub application_properties: Option<BTreeMap<String, String>>,
}

impl InboundMessage {
    pub fn new(device_id: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            device_id: device_id.into(),
            content_type: None,
            payload: payload.into(),
            application_properties: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_application_properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.application_properties = Some(properties);
        self
    }
}
