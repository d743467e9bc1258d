pub mod broker;
pub mod domain;
pub mod nats;
pub mod telemetry;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use broker::{MockBrokerClient, MockBrokerConnection};
#[cfg(any(test, feature = "testing"))]
pub use domain::MockRecordSink;
