use crate::domain::{build_record, PayloadDecoder, SinkDispatcher};
use common::broker::InboundMessage;
use common::domain::MessageCategory;
use std::sync::Arc;
use tracing::{debug, info};

/// Per-message path: decode, build, dispatch
///
/// Installed as the message handler of every category consumer. Runs
/// synchronously on the delivering task and never blocks on the sink.
#[derive(Clone)]
pub struct IngestPipeline {
    decoder: Arc<dyn PayloadDecoder>,
    dispatcher: SinkDispatcher,
}

impl IngestPipeline {
    pub fn new(decoder: Arc<dyn PayloadDecoder>, dispatcher: SinkDispatcher) -> Self {
        Self {
            decoder,
            dispatcher,
        }
    }

    pub fn handle_message(&self, category: MessageCategory, message: InboundMessage) {
        info!(
            category = %category,
            device_id = %message.device_id,
            content_type = message.content_type.as_deref().unwrap_or("-"),
            payload_size = message.payload.len(),
            "received message"
        );

        let fields = self.decoder.decode(&message.payload);
        let record = build_record(&message.device_id, fields);

        debug!(record = %record, "built ingest record");

        self.dispatcher
            .dispatch(record, message.application_properties);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JsonPayloadDecoder, MockPayloadDecoder};
    use common::domain::{DecodedPayload, IngestRecord, MockRecordSink};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn pipeline_with_sink(
        decoder: Arc<dyn PayloadDecoder>,
        sink: MockRecordSink,
    ) -> (IngestPipeline, tokio::task::JoinHandle<()>) {
        let (dispatcher, worker) = SinkDispatcher::spawn(Arc::new(sink), CancellationToken::new());
        (IngestPipeline::new(decoder, dispatcher), worker)
    }

    #[tokio::test]
    async fn test_valid_payload_reaches_sink_once() {
        let mut mock_sink = MockRecordSink::new();
        mock_sink
            .expect_process()
            .withf(|record: &IngestRecord| {
                record.device_id == "dev-1"
                    && record.fields.len() == 2
                    && record.fields["temp"] == json!(21.5)
                    && record.fields["unit"] == json!("C")
            })
            .times(1)
            .returning(|_| Ok(()));

        let (pipeline, worker) = pipeline_with_sink(Arc::new(JsonPayloadDecoder::new()), mock_sink);

        pipeline.handle_message(
            MessageCategory::Telemetry,
            InboundMessage::new("dev-1", r#"{"temp": 21.5, "unit": "C"}"#)
                .with_content_type("application/json"),
        );
        drop(pipeline);

        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dispatched_with_empty_fields() {
        let mut mock_sink = MockRecordSink::new();
        mock_sink
            .expect_process()
            .withf(|record: &IngestRecord| record.device_id == "dev-9" && record.fields.is_empty())
            .times(1)
            .returning(|_| Ok(()));

        let (pipeline, worker) = pipeline_with_sink(Arc::new(JsonPayloadDecoder::new()), mock_sink);

        pipeline.handle_message(
            MessageCategory::Event,
            InboundMessage::new("dev-9", "{not valid json"),
        );
        drop(pipeline);

        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_pipeline_uses_configured_decoder() {
        let mut mock_decoder = MockPayloadDecoder::new();
        mock_decoder
            .expect_decode()
            .withf(|payload: &[u8]| payload == &[0x01, 0x67, 0x01, 0x10][..])
            .times(1)
            .returning(|_| {
                let mut fields = DecodedPayload::new();
                fields.insert("temperature_1".to_string(), json!(27.2));
                fields
            });

        let mut mock_sink = MockRecordSink::new();
        mock_sink
            .expect_process()
            .withf(|record: &IngestRecord| record.fields.contains_key("temperature_1"))
            .times(1)
            .returning(|_| Ok(()));

        let (pipeline, worker) = pipeline_with_sink(Arc::new(mock_decoder), mock_sink);

        pipeline.handle_message(
            MessageCategory::Telemetry,
            InboundMessage::new("dev-3", vec![0x01, 0x67, 0x01, 0x10]),
        );
        drop(pipeline);

        worker.await.unwrap();
    }
}
