//! `vigild` — the host-resident file-activity security monitor (§0-§9).
//!
//! Shaped after a `Cli`/`Commands` entry point and
//! an `init_tracing`/`shutdown_signal` idiom, reshaped per §10.9: `run`
//! (default, foreground), `validate`, and `init-config` are the only
//! subcommands, since there's no running-daemon transport in scope for a
//! `Stop`/`Status`/`Benchmark` client to talk to.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vigil_daemon::config::ConfigManager;
use vigil_daemon::Supervisor;

/// vigild — host-resident file-activity security monitor.
#[derive(Parser)]
#[command(name = "vigild")]
#[command(about = "Detects and logs suspicious file activity on configured roots")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the monitor in the foreground (default if no subcommand is given).
    Run(RunArgs),
    /// Validate a configuration file without starting the pipeline.
    Validate(ValidateArgs),
    /// Write a default configuration document to disk.
    InitConfig(InitConfigArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Configuration file path.
    #[arg(short, long, default_value = "vigil.json")]
    config: PathBuf,

    /// SQLite database path for the activity log.
    #[arg(short, long, default_value = "vigil.db")]
    database: PathBuf,

    /// Directory for watcher state-cache snapshots and the pidfile.
    #[arg(short, long, default_value = ".")]
    state_dir: PathBuf,

    /// Prometheus metrics listener port. Set to 0 to disable.
    #[arg(long, default_value = "9090")]
    metrics_port: u16,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[derive(Args)]
struct ValidateArgs {
    /// Configuration file to validate.
    #[arg(short, long, default_value = "vigil.json")]
    config: PathBuf,
}

#[derive(Args)]
struct InitConfigArgs {
    /// Output path for the generated configuration.
    #[arg(short, long, default_value = "vigil.json")]
    output: PathBuf,

    /// Overwrite an existing file at `output`.
    #[arg(long)]
    force: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run(args)) => run(args).await,
        Some(Commands::Validate(args)) => validate_config(args).await,
        Some(Commands::InitConfig(args)) => init_config(args).await,
        None => {
            run(RunArgs {
                config: PathBuf::from("vigil.json"),
                database: PathBuf::from("vigil.db"),
                state_dir: PathBuf::from("."),
                metrics_port: 9090,
                debug: false,
            })
            .await
        }
    }
}

async fn run(args: RunArgs) -> Result<()> {
    init_tracing(args.debug)?;
    info!("starting vigild v{}", env!("CARGO_PKG_VERSION"));

    let mut config_manager = ConfigManager::new();
    if args.config.exists() {
        config_manager
            .load_from_file(&args.config)
            .await
            .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;
    } else {
        warn!(
            path = %args.config.display(),
            "configuration file not found, starting with an empty root set"
        );
    }
    let config = config_manager.get_config().await;

    if args.metrics_port != 0 {
        init_metrics(args.metrics_port)?;
    }

    tokio::fs::create_dir_all(&args.state_dir)
        .await
        .with_context(|| format!("failed to create state directory {}", args.state_dir.display()))?;

    let store = vigil_storage::Store::open(&args.database)
        .await
        .with_context(|| format!("failed to open database at {}", args.database.display()))?;
    let supervisor = Supervisor::new(args.state_dir.clone(), store);

    if args.config.exists() {
        config_manager
            .start_hot_reload()
            .await
            .context("failed to start configuration hot-reload")?;
        let mut changes = config_manager.subscribe_changes();
        let supervisor_for_reload = std::sync::Arc::new(supervisor);
        supervisor_for_reload.start(config).await.context("failed to start pipeline")?;

        let reload_supervisor = supervisor_for_reload.clone();
        let reload_task = tokio::spawn(async move {
            while let Ok(new_config) = changes.recv().await {
                info!("configuration changed on disk, restarting pipeline");
                if let Err(err) = reload_supervisor.restart(new_config).await {
                    error!(error = %err, "failed to restart pipeline after config change");
                }
            }
        });

        shutdown_signal().await;
        info!("shutdown signal received, stopping");
        reload_task.abort();
        supervisor_for_reload.stop().await.context("failed to stop pipeline cleanly")?;
    } else {
        supervisor.start(config).await.context("failed to start pipeline")?;
        shutdown_signal().await;
        info!("shutdown signal received, stopping");
        supervisor.stop().await.context("failed to stop pipeline cleanly")?;
    }

    Ok(())
}

async fn validate_config(args: ValidateArgs) -> Result<()> {
    let mut config_manager = ConfigManager::new();
    config_manager
        .load_from_file(&args.config)
        .await
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;

    // `load_from_file` already validates via `MonitorConfig::validate`; a
    // failure there surfaces as an `Err` above.
    println!("configuration is valid: {}", args.config.display());
    Ok(())
}

async fn init_config(args: InitConfigArgs) -> Result<()> {
    if args.output.exists() && !args.force {
        anyhow::bail!(
            "configuration file already exists: {} (use --force to overwrite)",
            args.output.display()
        );
    }

    let config_manager = ConfigManager::new();
    config_manager
        .save_to_file(&args.output)
        .await
        .with_context(|| format!("failed to write configuration to {}", args.output.display()))?;

    info!("wrote default configuration to {}", args.output.display());
    Ok(())
}

fn init_tracing(debug: bool) -> Result<()> {
    let level = if debug { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

fn init_metrics(port: u16) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .with_context(|| format!("failed to install Prometheus exporter on port {port}"))?;
    info!("metrics endpoint started on port {}", port);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
