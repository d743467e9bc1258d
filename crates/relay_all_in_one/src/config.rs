use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use telemetry_relay::RelayConfig;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // NATS configuration
    /// NATS server URL
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Timeout for establishing the NATS connection in seconds
    #[serde(default = "default_nats_connect_timeout_secs")]
    pub nats_connect_timeout_secs: u64,

    // Relay configuration
    /// Tenant whose northbound topics are consumed
    #[serde(default = "default_tenant_id")]
    pub tenant_id: String,

    /// Message categories to consume: telemetry, event or all
    #[serde(default = "default_message_type")]
    pub message_type: String,

    /// Delay before reconnecting or re-opening a consumer link in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    // OpenTelemetry configuration
    /// OTLP collector endpoint
    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    /// Export traces and logs over OTLP
    #[serde(default = "default_otel_enabled")]
    pub otel_enabled: bool,

    /// Service name reported to the collector
    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_nats_connect_timeout_secs() -> u64 {
    10
}

fn default_tenant_id() -> String {
    "DEFAULT_TENANT".to_string()
}

fn default_message_type() -> String {
    "all".to_string()
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_enabled() -> bool {
    false
}

fn default_otel_service_name() -> String {
    "telemetry-relay".to_string()
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("RELAY"))
            .build()?
            .try_deserialize()
    }

    pub fn nats_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.nats_connect_timeout_secs)
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            tenant_id: self.tenant_id.clone(),
            message_type: self.message_type.clone(),
            retry_delay_ms: self.retry_delay_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests mutate the process environment and must not interleave
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    const RELAY_VARS: [&str; 4] = [
        "RELAY_LOG_LEVEL",
        "RELAY_TENANT_ID",
        "RELAY_MESSAGE_TYPE",
        "RELAY_RETRY_DELAY_MS",
    ];

    fn clear_relay_vars() {
        for var in RELAY_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear_relay_vars();

        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.tenant_id, "DEFAULT_TENANT");
        assert_eq!(config.message_type, "all");
        assert_eq!(config.nats_connect_timeout(), Duration::from_secs(10));

        let relay = config.relay_config();
        assert_eq!(relay.retry_delay(), Duration::from_secs(1));
        assert_eq!(relay.enabled_categories().len(), 2);
    }

    #[test]
    fn test_custom_config() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear_relay_vars();

        std::env::set_var("RELAY_TENANT_ID", "acme");
        std::env::set_var("RELAY_MESSAGE_TYPE", "Telemetry");
        std::env::set_var("RELAY_RETRY_DELAY_MS", "250");

        let config = ServiceConfig::from_env().unwrap();
        let relay = config.relay_config();
        assert_eq!(relay.tenant_id, "acme");
        assert_eq!(relay.retry_delay(), Duration::from_millis(250));
        assert_eq!(relay.enabled_categories().len(), 1);

        clear_relay_vars();
    }
}
