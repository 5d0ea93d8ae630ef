//! `fshared` command-line entry point.
//!
//! # Usage
//!
//! ```bash
//! # Start the server (foreground)
//! fshared start
//!
//! # Start on another port with an explicit data directory
//! fshared --port 6000 --data-dir /srv/fshare
//!
//! # Inspect the registry log without starting the server
//! fshared check-log
//!
//! # Enable debug logging
//! RUST_LOG=fshared=debug fshared start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown

use std::net::IpAddr;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;
use crate::registry::RegistryLog;
use crate::server::FileServer;

/// fshared - multi-user file sharing server
#[derive(Parser, Debug)]
#[command(name = "fshared", version, about)]
pub struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    overrides: ConfigArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the server in the foreground
    Start,
    /// Load the registry log and report what it contains
    CheckLog,
}

/// Flags that override the config file and environment.
#[derive(ClapArgs, Debug, Default)]
struct ConfigArgs {
    /// Config file (default: <config dir>/fshare/server.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Address to bind
    #[arg(long, global = true)]
    bind: Option<IpAddr>,

    /// Directory holding the registry log and stored files
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

impl ConfigArgs {
    fn resolve(&self) -> Result<ServerConfig> {
        let mut config = ServerConfig::load(self.config.as_deref())
            .context("Failed to load configuration")?;
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(data_dir) = &self.data_dir {
            config.data_dir = data_dir.clone();
        }
        Ok(config)
    }
}

/// Parses the command line and runs the requested command.
pub fn run() -> Result<()> {
    let args = Args::parse();
    let config = args.overrides.resolve()?;

    match args.command.unwrap_or(Command::Start) {
        Command::Start => run_daemon(config),
        Command::CheckLog => check_log(config),
    }
}

fn init_logging() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("fshared=info".parse()?)
                .add_directive("fshare_core=info".parse()?)
                .add_directive("fshare_protocol=info".parse()?),
        )
        .init();
    Ok(())
}

/// Runs the server (async entry point).
#[tokio::main]
async fn run_daemon(config: ServerConfig) -> Result<()> {
    init_logging()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        data_dir = %config.data_dir.display(),
        "fshare server starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let server = FileServer::bind(&config, cancel_token)
        .await
        .with_context(|| format!("Failed to start server on {}", config.socket_addr()))?;

    // Mirror server activity into the log at debug level.
    let mut events = server.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::debug!(target: "fshared::events", "{event}");
        }
    });

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("fshare server stopped");
    Ok(())
}

/// Reports the contents of the registry log.
#[tokio::main]
async fn check_log(config: ServerConfig) -> Result<()> {
    let log = RegistryLog::new(config.registry_log_path());
    let report = log
        .load()
        .await
        .with_context(|| format!("Failed to read {}", log.path().display()))?;

    println!("Registry log: {}", log.path().display());
    println!("Records: {}", report.entries.len());
    println!("Skipped lines: {}", report.skipped);
    for key in report.entries.keys() {
        println!("  {key}");
    }
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
