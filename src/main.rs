//! broker-log - passive audit service
//!
//! Subscribes to a configured list of topics across services' namespaces and
//! records every message it sees. It never publishes.

use broker_link::config::{ServiceConfig, TOPICS_ENV};
use broker_link::error::ConnectError;
use broker_link::manager::{run_scoped, BrokerConnectionManager, ConnectionState};
use broker_link::observability::init_default_logging;
use broker_link::sink::LoggingSink;
use broker_link::transport::{BrokerClient, MqttBrokerClient};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::future::Future;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::time::Duration;
use tracing::{error, info, warn};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Broker audit/log-sink service
#[derive(Parser)]
#[command(name = "broker-log")]
#[command(about = "Records every message on the configured broker topics")]
#[command(version)]
struct Cli {
    /// Configuration file path; falls back to MQTT_* environment variables
    #[arg(short, long, value_name = "FILE", env = "BROKER_LOG_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and log until SIGINT/SIGTERM
    Run {
        /// Also append every message as a JSON line to this file
        #[arg(long, value_name = "FILE", env = "BROKER_LOG_AUDIT_FILE")]
        audit_file: Option<PathBuf>,

        /// Seconds to wait for in-flight work on shutdown
        #[arg(long, default_value_t = 30)]
        shutdown_grace_secs: u64,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting broker-log v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            eprintln!("broker-log: {e}");
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run {
            audit_file,
            shutdown_grace_secs,
        } => run_service(config, audit_file, Duration::from_secs(shutdown_grace_secs)).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(config_path: &Option<PathBuf>) -> Result<ServiceConfig, BoxError> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(ServiceConfig::load_from_file(path)?)
        }
        None => {
            let default_path = PathBuf::from("broker-log.toml");
            if default_path.exists() {
                info!("Loading configuration from: {}", default_path.display());
                return Ok(ServiceConfig::load_from_file(&default_path)?);
            }

            info!("No configuration file, reading MQTT_* environment variables");
            let config = ServiceConfig::from_env(&[TOPICS_ENV])?;
            Ok(config)
        }
    }
}

fn build_sink(audit_file: Option<PathBuf>) -> Result<LoggingSink, BoxError> {
    match audit_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            info!("Appending audit records to {}", path.display());
            Ok(LoggingSink::with_audit_writer(file))
        }
        None => Ok(LoggingSink::new()),
    }
}

async fn run_service(
    config: ServiceConfig,
    audit_file: Option<PathBuf>,
    grace: Duration,
) -> Result<(), BoxError> {
    let connection = config.connection_config()?;
    let topics = config.topic_interest()?;
    if topics.is_empty() {
        warn!("No topics configured, nothing will be logged");
    }

    // Sink first, then the manager that delivers into it
    let sink = Arc::new(build_sink(audit_file)?);
    let client = MqttBrokerClient::new(connection.clone());
    let manager = Arc::new(BrokerConnectionManager::new(client, connection, topics, sink));

    info!(
        client_id = %manager.client_id(),
        topics = manager.topics().len(),
        "Application starting"
    );

    run_scoped(manager, grace, |manager| async move {
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

        let signal = wait_for_signal(&mut sigint, &mut sigterm);
        if !connect_unless_signalled(&manager, signal).await? {
            return Ok(());
        }

        info!("Logging messages on {:?}", manager.subscribed_topics());

        tokio::select! {
            name = wait_for_signal(&mut sigint, &mut sigterm) => {
                info!("Received {}, shutting down gracefully...", name);
            }
            _ = wait_for_permanent_disconnect(&manager) => {
                error!("Broker connection permanently lost, shutting down...");
            }
        }
        Ok::<(), BoxError>(())
    })
    .await
}

async fn wait_for_signal(
    sigint: &mut signal::unix::Signal,
    sigterm: &mut signal::unix::Signal,
) -> &'static str {
    tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    }
}

/// Connect unless `signal` fires first; `Ok(false)` means it was interrupted
/// and the caller should go straight to shutdown
async fn connect_unless_signalled<B: BrokerClient>(
    manager: &BrokerConnectionManager<B>,
    signal: impl Future<Output = &'static str>,
) -> Result<bool, ConnectError> {
    tokio::select! {
        result = manager.connect(true, true) => result.map(|()| true),
        name = signal => {
            info!("Received {} while connecting, shutting down...", name);
            Ok(false)
        }
    }
}

/// Resolves once the manager settles at Disconnected after being connected
async fn wait_for_permanent_disconnect(manager: &BrokerConnectionManager<MqttBrokerClient>) {
    let mut state_rx = manager.subscribe_state();
    let _ = state_rx
        .wait_for(|state| *state == ConnectionState::Disconnected)
        .await
        .map(|_| ());
}

fn handle_config_command(config: &ServiceConfig, show: bool) -> Result<(), BoxError> {
    config.validate()?;
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }
    println!("Configuration is valid");
    Ok(())
}
