//! SMS gateway entry point

use clap::{Parser, Subcommand};
use sms_gateway::config::GatewayConfig;
use sms_gateway::gateway::GatewayLifecycle;
use sms_gateway::modem::AtModem;
use sms_gateway::observability::{init_logging_with_verbosity, HealthServer};
use sms_gateway::protocol::TopicScheme;
use sms_gateway::transport::mqtt::MqttClient;
use sms_gateway::transport::Transport;
use sms_gateway::GatewayError;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["sms-gateway.toml", "config/sms-gateway.toml"];

/// Bridge a GSM modem to MQTT with Home Assistant discovery
#[derive(Parser)]
#[command(name = "sms-gateway")]
#[command(about = "Bridge a GSM/SMS modem to an MQTT broker")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "SMS_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway
    Run,
    /// Validate the configuration
    Config {
        /// Print the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging_with_verbosity(cli.verbose);

    info!("Starting SMS gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_gateway(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(config_path: Option<&Path>) -> Result<GatewayConfig, GatewayError> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
            .ok_or_else(|| {
                GatewayError::internal_error(
                    "No configuration file found. Provide one with -c/--config or create sms-gateway.toml",
                )
            })?,
    };
    info!("Loading configuration from: {}", path.display());
    Ok(GatewayConfig::load_from_file(&path)?)
}

async fn run_gateway(config: GatewayConfig) -> Result<(), GatewayError> {
    let command_timeout = Duration::from_secs(config.modem.command_timeout_secs);
    info!(device = %config.modem.device, "Opening modem");
    let modem = AtModem::open(&config.modem.device, config.modem.baud_rate, command_timeout).await?;

    let topics = TopicScheme::from_config(&config.mqtt);
    let transport = MqttClient::new(config.mqtt.clone(), topics).map_err(GatewayError::transport)?;

    let health = config.health.clone();
    let mut gateway = GatewayLifecycle::new(config, transport, Arc::new(modem));
    gateway.start().await?;

    if health.enabled {
        let server = Arc::new(HealthServer::new(
            health.port,
            gateway.connectivity().clone(),
            gateway.counter().clone(),
        ));
        if let Some(state_rx) = gateway.transport().and_then(|t| t.watch_state()) {
            server.follow_mqtt_state(state_rx);
        }
        match server.bind() {
            Ok((_, serve)) => {
                tokio::spawn(serve);
            }
            Err(e) => error!(port = health.port, error = %e, "Health server could not start"),
        }
    }

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .map_err(|e| GatewayError::internal_error(format!("SIGINT handler: {e}")))?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .map_err(|e| GatewayError::internal_error(format!("SIGTERM handler: {e}")))?;

    info!("Gateway running");

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
        _ = gateway.wait_for_permanent_disconnect() => {
            error!("MQTT connection permanently lost, shutting down gateway...");
        }
    }

    gateway.shutdown().await?;
    Ok(())
}

fn handle_config_command(config: &GatewayConfig, show: bool) -> Result<(), GatewayError> {
    info!("Configuration is valid");
    if show {
        let rendered = toml::to_string_pretty(config)
            .map_err(|e| GatewayError::internal_error(format!("Cannot render configuration: {e}")))?;
        println!("{rendered}");
    }
    Ok(())
}
