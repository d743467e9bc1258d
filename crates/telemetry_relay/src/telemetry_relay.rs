use crate::domain::{
    ConnectionManager, IngestPipeline, JsonPayloadDecoder, RelayConfig, RelayHandle, RelayResult,
    SinkDispatcher,
};
use common::broker::BrokerClient;
use common::domain::RecordSink;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The assembled relay: connection manager in front, sink worker behind
pub struct TelemetryRelay {
    manager: ConnectionManager,
    sink_token: CancellationToken,
    sink_worker: JoinHandle<()>,
}

impl TelemetryRelay {
    /// Must be called from within a tokio runtime; the sink worker is
    /// spawned immediately.
    pub fn new(broker: Arc<dyn BrokerClient>, sink: Arc<dyn RecordSink>, config: RelayConfig) -> Self {
        debug!(
            tenant_id = %config.tenant_id,
            message_type = %config.message_type,
            "initializing telemetry relay"
        );

        let sink_token = CancellationToken::new();
        let (dispatcher, sink_worker) = SinkDispatcher::spawn(sink, sink_token.clone());
        let pipeline = IngestPipeline::new(Arc::new(JsonPayloadDecoder::new()), dispatcher);
        let manager = ConnectionManager::new(broker, pipeline, &config);

        Self {
            manager,
            sink_token,
            sink_worker,
        }
    }

    pub fn handle(&self) -> RelayHandle {
        self.manager.handle()
    }

    /// Run until `shutdown` is cancelled or a configuration fault occurs,
    /// then drain records already handed to the sink.
    pub async fn run(self, shutdown: CancellationToken) -> RelayResult<()> {
        let outcome = self.manager.run(shutdown).await;

        self.sink_token.cancel();
        if let Err(e) = self.sink_worker.await {
            warn!(error = %e, "sink worker terminated abnormally");
        }

        outcome
    }
}
