mod connection_manager;
mod consumer_registry;
mod error;
mod ingest_pipeline;
mod payload_decoder;
mod record_builder;
mod relay_config;
mod sink_dispatcher;

pub use connection_manager::*;
pub use consumer_registry::*;
pub use error::*;
pub use ingest_pipeline::*;
pub use payload_decoder::*;
pub use record_builder::*;
pub use relay_config::*;
pub use sink_dispatcher::*;
