use crate::broker::InboundMessage;
use crate::domain::MessageCategory;
use std::collections::BTreeMap;

/// Header carrying the originating device identifier
pub const DEVICE_ID_HEADER: &str = "device_id";

/// Header carrying the payload content type
pub const CONTENT_TYPE_HEADER: &str = "content-type";

const TRACE_CONTEXT_HEADERS: [&str; 2] = ["traceparent", "tracestate"];

/// Subject a category consumer subscribes to: `{category}.{tenant_id}.>`
///
/// Devices publish on `{category}.{tenant_id}.{device_id}`.
pub fn consumer_subject(category: MessageCategory, tenant_id: &str) -> String {
    format!("{}.{}.>", category, tenant_id)
}

/// Extract the broker-neutral message from a NATS message
///
/// The device id comes from the `device_id` header and falls back to the
/// subject token after the tenant. Every header other than the device id,
/// the content type and trace context is passed on as an application property.
pub fn inbound_message_from_nats(message: &async_nats::Message) -> InboundMessage {
    let header = |name: &str| {
        message
            .headers
            .as_ref()
            .and_then(|headers| headers.get(name))
            .map(|value| value.as_str().to_string())
    };

    let device_id = header(DEVICE_ID_HEADER)
        .unwrap_or_else(|| device_id_from_subject(message.subject.as_str()));

    InboundMessage {
        device_id,
        content_type: header(CONTENT_TYPE_HEADER),
        payload: message.payload.clone(),
        application_properties: message.headers.as_ref().and_then(application_properties),
    }
}

fn application_properties(headers: &async_nats::HeaderMap) -> Option<BTreeMap<String, String>> {
    let properties: BTreeMap<String, String> = headers
        .iter()
        .map(|(name, values)| (name.to_string(), values))
        .filter(|(name, _)| {
            name != DEVICE_ID_HEADER
                && !name.eq_ignore_ascii_case(CONTENT_TYPE_HEADER)
                && !TRACE_CONTEXT_HEADERS.contains(&name.as_str())
        })
        .map(|(name, values)| {
            let joined = values
                .iter()
                .map(|value| value.as_str())
                .collect::<Vec<_>>()
                .join(",");
            (name, joined)
        })
        .collect();

    if properties.is_empty() {
        None
    } else {
        Some(properties)
    }
}

/// `telemetry.acme.dev-1` yields `dev-1`; subjects without a device token yield ""
fn device_id_from_subject(subject: &str) -> String {
    subject
        .splitn(3, '.')
        .nth(2)
        .unwrap_or_default()
        .to_string()
}
