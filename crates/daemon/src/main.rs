//! Eventbus - Main Entry Point
//! Relays repository events from STOMP queues to HTTP microservices

mod config;
mod telemetry;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use eventbus_core::application::consumer::constants::{BROKER_ADDR_ENV, DEFAULT_BROKER_ADDR};
use eventbus_core::application::{shutdown_channel, Supervisor, SupervisorConfig};
use eventbus_infra_http::ReqwestTransportFactory;
use eventbus_infra_stomp::{StompConfig, StompConnector};

use config::{ServerConfig, CONFIG_PATH_ENV, CONFIG_YML_ENV, DEFAULT_CONFIG_PATH, RECONNECT_DELAY_ENV};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const LOG_FORMAT_ENV: &str = "EVENTBUS_LOG_FORMAT";
const DEFAULT_LOG_FILTER: &str = "eventbus=info";

#[derive(Parser, Debug)]
#[command(name = "eventbus")]
#[command(about = "Relays repository events from a STOMP broker to HTTP services", long_about = None)]
#[command(version)]
struct Cli {
    /// Queue configuration file
    #[arg(long, env = CONFIG_PATH_ENV, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Inline queue configuration (YAML); overrides --config
    #[arg(long, env = CONFIG_YML_ENV, hide_env_values = true)]
    config_yml: Option<String>,

    /// STOMP broker host:port
    #[arg(long, env = BROKER_ADDR_ENV, default_value = DEFAULT_BROKER_ADDR)]
    broker_addr: String,

    /// Pause between broker sessions of one worker, in milliseconds
    #[arg(long, env = RECONNECT_DELAY_ENV, default_value_t = 0)]
    reconnect_delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Logging (pretty for development, JSON for production)
    init_logging();
    info!("Eventbus v{} starting...", VERSION);

    // 2. Configuration; any failure here exits before a worker starts
    let server_config = ServerConfig::load(cli.config_yml.as_deref(), &cli.config)
        .context("Configuration failed")?;
    info!(
        queues = server_config.queues.len(),
        subscribed = server_config.subscribed_queues(),
        broker = %cli.broker_addr,
        "Configuration loaded"
    );
    if server_config.subscribed_queues() == 0 {
        warn!("No subscribed queues; nothing will be consumed");
    }

    // 3. Wiring
    let connector = Arc::new(StompConnector::new(
        StompConfig::default().with_addr(cli.broker_addr),
    ));
    let supervisor = Supervisor::new(
        server_config.queues,
        connector,
        Arc::new(ReqwestTransportFactory),
        SupervisorConfig {
            reconnect_delay: Duration::from_millis(cli.reconnect_delay_ms),
        },
    );

    // 4. Start consumers
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let pool = supervisor.start(shutdown_rx);
    info!(workers = pool.worker_count(), "Consumers started");

    // 5. Wait for SIGINT / SIGTERM, then drain
    wait_for_signal().await?;
    info!("Shutdown signal received. Draining consumers...");

    shutdown_tx.shutdown();
    pool.wait().await;
    telemetry::shutdown();

    info!("Shutdown complete.");
    Ok(())
}

fn init_logging() {
    let log_format = std::env::var(LOG_FORMAT_ENV).unwrap_or_else(|_| "pretty".to_string());

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let fmt_layer = match log_format.as_str() {
        "json" => fmt::layer().json().boxed(),
        _ => fmt::layer().pretty().boxed(),
    };

    let (otel_layer, otel_error) = match telemetry::layer() {
        Ok(layer) => (layer, None),
        Err(e) => (None, Some(e)),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .init();

    if let Some(e) = otel_error {
        warn!(error = ?e, "Failed to initialize OpenTelemetry (continuing without it)");
    } else if telemetry::endpoint().is_some() && !cfg!(feature = "telemetry") {
        warn!("OpenTelemetry endpoint set but feature 'telemetry' not enabled");
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).context("Installing SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Waiting for Ctrl+C")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c().await.context("Waiting for Ctrl+C")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let cli = Cli::try_parse_from(["eventbus"]).unwrap();
        assert!(!cli.config.is_empty());
        assert!(!cli.broker_addr.is_empty());
    }

    #[test]
    fn cli_flags() {
        let cli = Cli::try_parse_from([
            "eventbus",
            "--config",
            "~/eventbus.yaml",
            "--broker-addr",
            "localhost:61613",
            "--reconnect-delay-ms",
            "250",
        ])
        .unwrap();
        assert_eq!(cli.config, "~/eventbus.yaml");
        assert_eq!(cli.broker_addr, "localhost:61613");
        assert_eq!(cli.reconnect_delay_ms, 250);
    }

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
