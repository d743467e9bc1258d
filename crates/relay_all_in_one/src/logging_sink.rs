use async_trait::async_trait;
use common::domain::{DomainError, DomainResult, IngestRecord, RecordSink};
use tracing::info;

/// Sink that writes every record to the log
///
/// Stands in for a persistent store; anything implementing [`RecordSink`]
/// can replace it.
#[derive(Debug, Default)]
pub struct LoggingRecordSink;

impl LoggingRecordSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RecordSink for LoggingRecordSink {
    async fn process(&self, record: &IngestRecord) -> DomainResult<()> {
        let fields = serde_json::to_string(&record.fields)
            .map_err(|e| DomainError::SinkError(format!("failed to serialize fields: {}", e)))?;

        info!(
            device_id = %record.device_id,
            field_count = record.fields.len(),
            fields = %fields,
            "ingested record"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_process_accepts_nested_fields() {
        let sink = LoggingRecordSink::new();
        let fields = json!({"temp": 21.5, "location": {"lat": 1.0, "lon": 2.0}, "tags": ["a"]})
            .as_object()
            .cloned()
            .unwrap();

        let result = sink.process(&IngestRecord::new("dev-1", fields)).await;

        assert!(result.is_ok());
    }
}
