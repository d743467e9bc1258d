mod domain;
mod telemetry_relay;

pub use domain::*;
pub use telemetry_relay::*;
