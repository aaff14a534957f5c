//! forward-ports
//!
//! Forwards the `forwardPorts` of a workspace's devcontainer.json from
//! localhost into the running devcontainer, following the container across
//! restarts.

mod logging;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use fp_core::config::{
    self, devcontainer_config_path, load_devcontainer_config, ForwarderConfig,
};
use fp_core::ConfigError;
use fp_forward::docker::DockerCli;
use fp_forward::DevContainerForwarder;

#[derive(Parser)]
#[command(name = "forward-ports")]
#[command(author, version, about = "Forward devcontainer ports to localhost")]
struct Cli {
    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// The workspace folder on which to operate (defaults to the current directory)
    #[arg(long, value_name = "DIR")]
    workspace_folder: Option<PathBuf>,

    /// Path to forwarder settings (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory for the daily log file (defaults to the current directory)
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Log level when --debug and RUST_LOG are not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = std::env::current_dir().context("failed to determine the current directory")?;
    let log_dir = cli.log_dir.clone().unwrap_or_else(|| cwd.clone());
    let log_level = if cli.debug { "debug" } else { cli.log_level.as_str() };
    let _log_guard = logging::init(&log_dir, log_level)?;

    let workspace = cli.workspace_folder.clone().unwrap_or(cwd);
    let workspace = workspace
        .canonicalize()
        .with_context(|| format!("workspace folder {} is not accessible", workspace.display()))?;

    tracing::info!(
        debug = cli.debug,
        workspace_folder = %workspace.display(),
        "Starting forwarder"
    );

    let settings = load_settings(cli.config.as_deref())?;

    let config_path = devcontainer_config_path(&workspace);
    let devcontainer = load_devcontainer_config(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    tracing::info!("Loaded devcontainer configuration: {}", devcontainer);

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let runtime = DockerCli::from_config(&settings);
    let forwarder = DevContainerForwarder::new(runtime, workspace, &devcontainer, settings, &cancel)
        .context("failed to create forwarder")?;
    let handle = forwarder.start().await.context("failed to start forwarder")?;

    match handle.wait().await {
        Some(exit) => tracing::info!("Stopped forwarder: {}", exit.reason),
        None => tracing::info!("Stopped forwarder"),
    }

    Ok(())
}

/// Settings from `--config`, else from the default location if present
fn load_settings(path: Option<&Path>) -> Result<ForwarderConfig> {
    match path {
        Some(path) => config::load_config(path)
            .with_context(|| format!("failed to load settings from {}", path.display())),
        None => match config::load_config(&config::default_config_path()) {
            Ok(settings) => Ok(settings),
            Err(ConfigError::NotFound(_)) => Ok(ForwarderConfig::default()),
            Err(e) => {
                tracing::warn!("Ignoring invalid settings file: {}", e);
                Ok(ForwarderConfig::default())
            }
        },
    }
}

/// Cancel `cancel` on Ctrl+C or SIGTERM
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, shutting down...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, shutting down...");
            }
            _ = cancel.cancelled() => return,
        }

        cancel.cancel();
    });
}
