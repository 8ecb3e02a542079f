use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tapewatch::cli::{commands, tui};
use tapewatch::config::{AppConfig, DEFAULT_CONFIG_PATH};
use tapewatch::context::AppContext;
use tapewatch::logging::{self, LogConfig};
use tapewatch::sim::{self, SimServer, SimulatedBackend};

#[derive(Parser)]
#[command(name = "tapewatch")]
#[command(about = "Tape drive and task console for a backup server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: /etc/tapewatch/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: GlobalArgs,
}

/// Options layered over the config file and environment.
#[derive(Args, Serialize)]
struct GlobalArgs {
    /// Backup server URL
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    server: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    node: Option<String>,

    /// Use the built-in simulated backend
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[arg(long, global = true)]
    simulation: bool,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List tape drives
    Drives,
    /// Show drive and media status
    Status { drive: String },
    /// Run a drive command, waiting for its task if it starts one
    Run {
        drive: String,
        command: String,
        /// Command parameter as key=value, e.g. label-text=TAPE01
        #[arg(long = "param")]
        params: Vec<String>,
    },
    /// List running tasks
    Tasks {
        /// Include finished tasks
        #[arg(long)]
        all: bool,
    },
    /// Interactive status panel for a drive
    Panel { drive: String },
    /// Serve a simulated tape API over HTTP
    Simulate {
        #[arg(long, default_value = "127.0.0.1:8007")]
        bind: SocketAddr,
    },
    /// Write a config file with default values
    InitConfig {
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    if let Commands::InitConfig { path } = &cli.command {
        let path = path.as_deref().unwrap_or(&config_path);
        return init_config(path);
    }

    let config = AppConfig::load(&config_path, Some(&cli.overrides))?;

    // The panel owns the terminal, keep log lines off it.
    let log_file = match (&cli.command, &config.log_file) {
        (_, Some(file)) => Some(file.clone()),
        (Commands::Panel { .. }, None) => Some(std::env::temp_dir().join("tapewatch.log")),
        _ => None,
    };
    logging::init(LogConfig {
        json: config.json_logs,
        verbose: config.verbose,
        file: log_file,
    })
    .context("Failed to initialize logging")?;

    match cli.command {
        Commands::Simulate { bind } => run_simulator(bind).await,
        command => {
            let ctx = AppContext::new(config).context("Failed to connect to backend")?;
            run_command(ctx, command).await
        }
    }
}

async fn run_command(ctx: AppContext, command: Commands) -> Result<()> {
    match command {
        Commands::Drives => commands::list_drives(&ctx).await,
        Commands::Status { drive } => commands::show_status(&ctx, &drive).await,
        Commands::Run {
            drive,
            command,
            params,
        } => {
            let params = commands::parse_params(&params)?;
            commands::run_command(&ctx, &drive, &command, params).await
        }
        Commands::Tasks { all } => commands::list_tasks(&ctx, all).await,
        Commands::Panel { drive } => tui::run(ctx, &drive).await,
        Commands::Simulate { .. } | Commands::InitConfig { .. } => Ok(()),
    }
}

async fn run_simulator(bind: SocketAddr) -> Result<()> {
    let backend = SimulatedBackend::demo();
    sim::spawn_stdin_controller(backend.clone());

    let server = Arc::new(SimServer::new(Arc::new(backend), bind));
    let mut serving = {
        let server = server.clone();
        tokio::spawn(async move { server.start().await })
    };

    tokio::select! {
        result = &mut serving => return result.context("Simulator task panicked")?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
        }
    }
    tracing::info!("Shutting down simulator");
    server.shutdown();

    serving.await.context("Simulator task panicked")?
}

fn init_config(path: &Path) -> Result<()> {
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    AppConfig::default()
        .write(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
