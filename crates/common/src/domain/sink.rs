use crate::domain::{DomainResult, IngestRecord};
use async_trait::async_trait;

/// Downstream collaborator that persists or further processes ingest records
///
/// Implementations should:
/// - Return `SinkError` (or any other `DomainError`) on failure
/// - Not assume they are called on the ingestion path; the relay hands records
///   over asynchronously and only logs failures
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Process a single ingest record
    async fn process(&self, record: &IngestRecord) -> DomainResult<()>;
}
