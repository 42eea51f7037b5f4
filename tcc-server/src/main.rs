//! Trade Credential Consumer
//!
//! Consumes trade events from Kafka, optionally verifies their credentials
//! through a Veramo agent and logs a processing summary for each of them.

mod config;
mod kafka;
mod server;
mod shutdown;
mod state;
mod telemetry;

use clap::{Parser, ValueEnum};
use config::{ConfigLoader, Overrides};
use kafka::RdKafkaSource;
use server::{build_router, run_server};
use shutdown::{spawn_signal_handler, wait_for};
use state::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use tcc_core::gateway::{InstrumentedVerifier, VerificationGateway};
use tcc_core::metrics::{APPLICATION_INFO, SharedMetrics};
use tcc_core::processors::{Dispatcher, ReadinessFlag};
use tcc_sdk::client::VerifierClient;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Trade Credential Consumer - Kafka trade event ingestion with credential verification
#[derive(Parser, Debug)]
#[command(name = "tcc-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to an optional TOML configuration file
    #[arg(short, long, env = "TCC_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(flatten)]
    overrides: Overrides,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing(args.log_format);

    tracing::info!("Starting tcc-server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_loader = ConfigLoader::new(args.config.as_ref(), args.overrides);
    let loaded = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    tracing::info!(
        topics = ?loaded.kafka.topics,
        group_id = %loaded.kafka.group_id,
        ssi_validation = loaded.pipeline.verification_enabled,
        processing_mode = %loaded.pipeline.effective_mode(),
        "Configuration loaded"
    );

    // Metrics
    let metrics: SharedMetrics = Arc::new(
        telemetry::install(loaded.metrics_listen, &loaded.labels).map_err(|e| {
            tracing::error!("Failed to install metrics exporter: {}", e);
            e
        })?,
    );
    metrics.record_info(APPLICATION_INFO, &loaded.info.pairs());

    // Verification agent
    let gateway: Option<Arc<dyn VerificationGateway>> = match &loaded.verifier {
        Some(settings) => {
            let client =
                VerifierClient::new(settings.url.clone(), settings.token.clone()).map_err(|e| {
                    tracing::error!("Failed to build verification client: {}", e);
                    e
                })?;
            tracing::info!(url = %settings.url, "Verification agent configured");
            Some(Arc::new(InstrumentedVerifier::new(client, metrics.clone())))
        }
        None => None,
    };

    let shutdown_rx = spawn_signal_handler().map_err(|e| {
        tracing::error!("Failed to install signal handlers: {}", e);
        e
    })?;

    // Health endpoint
    let readiness = ReadinessFlag::default();
    let router = build_router(AppState::new(readiness.clone()));
    let health_listen = loaded.health_listen;
    let health = tokio::spawn(run_server(
        router,
        health_listen,
        wait_for(shutdown_rx.clone()),
    ));

    // Consumer
    let source = RdKafkaSource::new(&loaded.kafka);
    let dispatcher = Dispatcher::new(
        loaded.pipeline,
        &loaded.labels,
        source,
        gateway,
        Arc::new(readiness),
        metrics,
    );
    let result = dispatcher.run(loaded.kafka.topics, shutdown_rx).await;

    health.abort();
    match health.await {
        Ok(Err(e)) => tracing::error!("Health server failed: {}", e),
        Ok(Ok(())) | Err(_) => {}
    }

    tracing::info!("Consumer shutdown complete");
    result.map_err(|e| {
        tracing::error!("Consumer stopped with an error: {}", e);
        e.into()
    })
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,rdkafka=warn"));

    let json = format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}
