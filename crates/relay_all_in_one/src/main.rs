mod config;
mod logging_sink;

use common::nats::NatsBroker;
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig, TelemetryProviders};
use config::ServiceConfig;
use logging_sink::LoggingRecordSink;
use std::sync::Arc;
use telemetry_relay::TelemetryRelay;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize telemetry (tracing + OpenTelemetry for traces and logs)
    let telemetry_providers: Option<TelemetryProviders> = match init_telemetry(&TelemetryConfig {
        service_name: config.otel_service_name.clone(),
        otel_endpoint: config.otel_endpoint.clone(),
        otel_enabled: config.otel_enabled,
        log_level: config.log_level.clone(),
    }) {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        otel_enabled = config.otel_enabled,
        nats_url = %config.nats_url,
        tenant_id = %config.tenant_id,
        message_type = %config.message_type,
        "Starting telemetry relay"
    );
    debug!("Configuration: {:?}", config);

    let broker = Arc::new(NatsBroker::new(
        config.nats_url.clone(),
        config.nats_connect_timeout(),
    ));
    let sink = Arc::new(LoggingRecordSink::new());
    let relay = TelemetryRelay::new(broker, sink, config.relay_config());

    let shutdown_token = CancellationToken::new();
    tokio::spawn({
        let shutdown_token = shutdown_token.clone();
        async move {
            wait_for_shutdown_signal().await;
            shutdown_token.cancel();
        }
    });

    let exit_code = match relay.run(shutdown_token).await {
        Ok(()) => {
            info!("Telemetry relay stopped");
            0
        }
        Err(e) => {
            error!(error = %e, "Telemetry relay failed");
            1
        }
    };

    // Flush pending traces and logs
    shutdown_telemetry(telemetry_providers);
    std::process::exit(exit_code);
}

/// Resolve on SIGINT, or SIGTERM on Unix
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error setting up signal handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Error setting up SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received shutdown signal"),
        _ = terminate => info!("Received SIGTERM signal"),
    }
}
