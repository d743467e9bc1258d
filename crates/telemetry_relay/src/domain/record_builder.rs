use common::domain::{DecodedPayload, IngestRecord};

/// Assemble the record for one inbound message.
///
/// The device id is taken as-is; extracting it is the broker adapter's job.
pub fn build_record(device_id: &str, decoded: DecodedPayload) -> IngestRecord {
    IngestRecord::new(device_id, decoded)
}
