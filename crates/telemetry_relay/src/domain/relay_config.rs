use common::domain::{enabled_categories, MessageCategory};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Tenant whose northbound topics are consumed
    pub tenant_id: String,

    /// Message categories to consume: `telemetry`, `event` or `all`
    pub message_type: String,

    /// Delay before reconnecting or re-opening a consumer link (default: 1 second)
    pub retry_delay_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            tenant_id: "DEFAULT_TENANT".to_string(),
            message_type: "all".to_string(),
            retry_delay_ms: 1000,
        }
    }
}

impl RelayConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Categories selected by `message_type`; empty when it names none
    pub fn enabled_categories(&self) -> BTreeSet<MessageCategory> {
        enabled_categories(&self.message_type)
    }
}
