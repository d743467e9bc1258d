use common::domain::{IngestRecord, RecordSink};
use futures::FutureExt;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn, Instrument};

/// Application-level metadata travelling with a record
pub type RecordMetadata = BTreeMap<String, String>;

#[derive(Debug)]
struct Dispatch {
    record: IngestRecord,
    metadata: Option<RecordMetadata>,
}

/// Boundary to the sink collaborator
///
/// `dispatch` only enqueues; a single worker task delivers records to the
/// sink in arrival order. Sink failures are logged by the worker and never
/// reach the caller. The queue is unbounded: there is no backpressure
/// towards the broker, and this is where flow control would be added.
#[derive(Clone)]
pub struct SinkDispatcher {
    queue: mpsc::UnboundedSender<Dispatch>,
}

impl SinkDispatcher {
    /// Start the delivery worker. Must be called within a Tokio runtime.
    ///
    /// The worker stops when every dispatcher clone is dropped, or when
    /// `shutdown` is cancelled, after draining what is already queued.
    pub fn spawn(sink: Arc<dyn RecordSink>, shutdown: CancellationToken) -> (Self, JoinHandle<()>) {
        let (queue, pending) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_sink_worker(sink, pending, shutdown).in_current_span());
        (Self { queue }, worker)
    }

    /// Hand a record to the sink without waiting for it to be processed
    pub fn dispatch(&self, record: IngestRecord, metadata: Option<RecordMetadata>) {
        if let Err(rejected) = self.queue.send(Dispatch { record, metadata }) {
            warn!(
                device_id = %rejected.0.record.device_id,
                "sink worker stopped, dropping record"
            );
        }
    }
}

async fn run_sink_worker(
    sink: Arc<dyn RecordSink>,
    mut pending: mpsc::UnboundedReceiver<Dispatch>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            next = pending.recv() => match next {
                Some(dispatch) => deliver(sink.as_ref(), dispatch).await,
                None => break,
            },
            _ = shutdown.cancelled() => {
                pending.close();
                while let Some(dispatch) = pending.recv().await {
                    deliver(sink.as_ref(), dispatch).await;
                }
                break;
            }
        }
    }

    debug!("sink worker stopped");
}

async fn deliver(sink: &dyn RecordSink, dispatch: Dispatch) {
    let Dispatch { record, metadata } = dispatch;

    // The call is made inside the guarded future so a sink that panics
    // before returning its future is caught as well
    let outcome = AssertUnwindSafe(async { sink.process(&record).await })
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(())) => debug!(device_id = %record.device_id, "record handed to sink"),
        Ok(Err(e)) => error!(
            error = %e,
            device_id = %record.device_id,
            "sink failed to process record"
        ),
        Err(panic) => error!(
            panic = panic_message(panic.as_ref()),
            device_id = %record.device_id,
            "sink panicked while processing record"
        ),
    }

    if let Some(properties) = metadata {
        debug!(
            device_id = %record.device_id,
            application_properties = ?properties,
            "... with application properties"
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::domain::{DecodedPayload, DomainError, DomainResult, MockRecordSink};
    use mockall::Sequence;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tracing_test::traced_test;

    fn record(device_id: &str) -> IngestRecord {
        IngestRecord::new(device_id, DecodedPayload::new())
    }

    #[tokio::test]
    async fn test_dispatch_delivers_record_once() {
        let mut mock_sink = MockRecordSink::new();
        mock_sink
            .expect_process()
            .withf(|record: &IngestRecord| record.device_id == "dev-1")
            .times(1)
            .returning(|_| Ok(()));

        let (dispatcher, worker) =
            SinkDispatcher::spawn(Arc::new(mock_sink), CancellationToken::new());

        dispatcher.dispatch(record("dev-1"), None);
        drop(dispatcher);

        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_sink_error_does_not_stop_later_records() {
        let mut mock_sink = MockRecordSink::new();
        let mut seq = Sequence::new();
        mock_sink
            .expect_process()
            .withf(|record: &IngestRecord| record.device_id == "dev-1")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(DomainError::SinkError("database unavailable".to_string())));
        mock_sink
            .expect_process()
            .withf(|record: &IngestRecord| record.device_id == "dev-2")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let (dispatcher, worker) =
            SinkDispatcher::spawn(Arc::new(mock_sink), CancellationToken::new());

        dispatcher.dispatch(record("dev-1"), None);
        dispatcher.dispatch(record("dev-2"), None);
        drop(dispatcher);

        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_records() {
        let mut mock_sink = MockRecordSink::new();
        mock_sink.expect_process().times(3).returning(|_| Ok(()));

        let shutdown = CancellationToken::new();
        let (dispatcher, worker) = SinkDispatcher::spawn(Arc::new(mock_sink), shutdown.clone());

        let mut metadata = RecordMetadata::new();
        metadata.insert("orig_adapter".to_string(), "hono-mqtt".to_string());

        dispatcher.dispatch(record("dev-1"), Some(metadata));
        dispatcher.dispatch(record("dev-2"), None);
        dispatcher.dispatch(record("dev-3"), None);
        shutdown.cancel();

        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_after_worker_stopped_does_not_panic() {
        let mock_sink = MockRecordSink::new();
        let shutdown = CancellationToken::new();
        let (dispatcher, worker) = SinkDispatcher::spawn(Arc::new(mock_sink), shutdown.clone());

        shutdown.cancel();
        worker.await.unwrap();

        dispatcher.dispatch(record("dev-late"), None);
    }

    struct PanicOnFirstSink {
        calls: AtomicUsize,
        delivered: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RecordSink for PanicOnFirstSink {
        async fn process(&self, record: &IngestRecord) -> DomainResult<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("sink exploded");
            }
            self.delivered.lock().unwrap().push(record.device_id.clone());
            Ok(())
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_sink_panic_does_not_stop_later_records() {
        let sink = Arc::new(PanicOnFirstSink {
            calls: AtomicUsize::new(0),
            delivered: Mutex::new(Vec::new()),
        });

        let (dispatcher, worker) = SinkDispatcher::spawn(
            Arc::clone(&sink) as Arc<dyn RecordSink>,
            CancellationToken::new(),
        );

        dispatcher.dispatch(record("dev-1"), None);
        dispatcher.dispatch(record("dev-2"), None);
        dispatcher.dispatch(record("dev-3"), None);
        dispatcher.dispatch(record("dev-4"), None);
        drop(dispatcher);

        worker.await.unwrap();

        assert_eq!(
            sink.delivered.lock().unwrap().as_slice(),
            &["dev-2", "dev-3", "dev-4"]
        );
        assert!(logs_contain("sink panicked while processing record"));
        assert!(logs_contain("sink exploded"));
    }
}
