//! parley server - line-oriented chat relay

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info};

use parley_utils::{LogConfig, ParleyError, Result};

mod cli;
mod config;
mod connection;
mod echo;
mod observability;
mod registry;
mod session;
mod tcp;
mod watchdog;

use cli::Args;
use config::{AppConfig, ConfigLoader, DEFAULT_CONFIG_TOML};
use registry::{Registry, RegistryHandle};

/// State shared by the accept loops
#[derive(Clone)]
pub struct SharedState {
    /// Submission side of the session registry
    pub registry: RegistryHandle,
    /// Effective configuration after CLI overrides
    pub config: Arc<AppConfig>,
    /// Fires once when the server should stop accepting
    pub shutdown_tx: broadcast::Sender<()>,
}

impl SharedState {
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }
}

/// Run the relay until Ctrl-C
async fn run_server(config: AppConfig) -> Result<()> {
    info!("parley server starting");

    // Nothing to serve without the chat listener
    let listener = tcp::bind(&config.server.listen_addr()).await?;

    let (registry, _registry_task) = Registry::spawn(config.server.intake_capacity);
    let (shutdown_tx, _) = broadcast::channel(1);
    let state = SharedState {
        registry,
        config: Arc::new(config),
        shutdown_tx,
    };

    let echo_task = if state.config.echo.enabled {
        match echo::bind(&state.config.echo.listen_addr()).await {
            Ok(echo_listener) => Some(tokio::spawn(echo::run_echo_server(
                echo_listener,
                state.config.echo.read_timeout(),
                state.subscribe_shutdown(),
            ))),
            Err(e) => {
                // The chat core runs fine without it
                error!("Echo endpoint unavailable: {}", e);
                None
            }
        }
    } else {
        info!("Echo endpoint disabled");
        None
    };

    let accept_task = tokio::spawn(tcp::run_tcp_accept_loop(listener, state.clone()));

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| ParleyError::internal(format!("failed to listen for Ctrl-C: {}", e)))?;
    info!("Ctrl-C received, shutting down");

    // Receivers are gone only if both loops already ended
    let _ = state.shutdown_tx.send(());

    if let Err(e) = accept_task.await {
        error!("TCP accept loop failed: {}", e);
    }
    if let Some(task) = echo_task {
        if let Err(e) = task.await {
            error!("Echo endpoint failed: {}", e);
        }
    }

    // Open sessions are not drained; they end with the runtime
    info!("parley server stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    if args.print_default_config {
        print!("{}", DEFAULT_CONFIG_TOML.trim_start());
        return Ok(());
    }

    let log_config = if args.verbose {
        LogConfig::development()
    } else {
        LogConfig::server(args.log_output.into())
    };
    parley_utils::init_logging_with_config(log_config)?;

    let mut config = ConfigLoader::load_and_validate(args.config.as_deref())?;
    if args.apply_overrides(&mut config) {
        ConfigLoader::validate(&config)?;
    }

    if let Err(e) = run_server(config).await {
        error!("Server error: {}", e);
        return Err(e);
    }
    Ok(())
}
