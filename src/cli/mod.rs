//! Command-line interface definitions.

pub mod clean;
pub mod logs;
pub mod output;
pub mod start;
pub mod status;
pub mod stop;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::config::Settings;
use crate::error::Result;
use crate::gpu::ToolkitGpu;
use crate::manager::{HealthProbe, ManagerConfig, ServiceManager, SystemClock};
use crate::runtime::runtime_for;
use crate::secrets::FileSecretStore;
use crate::spec::ServiceCatalog;

/// podstack - Local AI service stack on podman or docker.
#[derive(Parser, Debug)]
#[command(name = "podstack")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "podstack.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start services and wait for them to become healthy
    Start(StartArgs),

    /// Stop running services
    Stop(StopArgs),

    /// Show service status
    Status(StatusArgs),

    /// Tail a service's container logs
    Logs(LogsArgs),

    /// Remove containers and groups, optionally data volumes
    Clean(CleanArgs),
}

/// Arguments for the `start` subcommand.
#[derive(Parser, Debug)]
pub struct StartArgs {
    /// Services to start (all enabled services when omitted)
    pub services: Vec<String>,

    /// Start GPU services without GPU flags
    #[arg(long)]
    pub cpu: bool,

    /// Pull images even when present locally
    #[arg(long)]
    pub refresh: bool,
}

/// Arguments for the `stop` subcommand.
#[derive(Parser, Debug)]
pub struct StopArgs {
    /// Services to stop (all enabled services when omitted)
    pub services: Vec<String>,

    /// Also remove the stopped containers and groups
    #[arg(long)]
    pub rm: bool,

    /// Skip confirmation prompt
    #[arg(long)]
    pub yes: bool,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Services to show (all enabled services when omitted)
    pub services: Vec<String>,
}

/// Arguments for the `logs` subcommand.
#[derive(Parser, Debug)]
pub struct LogsArgs {
    /// Service whose logs to show
    pub service: String,

    /// Follow log output (like tail -f)
    #[arg(short, long)]
    pub follow: bool,

    /// Number of lines to show
    #[arg(short = 'n', long, default_value = "50")]
    pub lines: u32,

    /// Show logs since (e.g. "10m", "1h")
    #[arg(long)]
    pub since: Option<String>,
}

/// Arguments for the `clean` subcommand.
#[derive(Parser, Debug)]
pub struct CleanArgs {
    /// Services to clean (all enabled services when omitted)
    pub services: Vec<String>,

    /// Also delete named data volumes (destructive)
    #[arg(long)]
    pub volumes: bool,

    /// Skip confirmation prompt
    #[arg(long)]
    pub yes: bool,
}

/// Load settings, initialize logging, and dispatch the command.
pub async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load(&cli.config)?;
    settings.logging.init();
    let catalog = ServiceCatalog::from_settings(&settings)?;

    match &cli.command {
        Commands::Start(args) => start::execute(&settings, &catalog, args).await,
        Commands::Stop(args) => stop::execute(&settings, &catalog, args).await,
        Commands::Status(args) => status::execute(&settings, &catalog, args).await,
        Commands::Logs(args) => logs::execute(&settings, &catalog, args).await,
        Commands::Clean(args) => clean::execute(&settings, &catalog, args).await,
    }
}

/// Wire a service manager from resolved settings with production
/// collaborators.
pub(crate) fn build_manager(settings: &Settings) -> Result<ServiceManager> {
    let runtime = runtime_for(&settings.runtime.prefer)?;
    let probe = HealthProbe::new(settings.orchestration.ping_timeout());
    let secrets = Arc::new(FileSecretStore::new()?);
    let config = ManagerConfig {
        startup_timeout: settings.orchestration.startup_timeout(),
        poll_interval: settings.orchestration.poll_interval(),
        stop_grace: settings.orchestration.stop_grace(),
        restart_policy: settings.runtime.restart_policy.clone(),
        pids_limit: settings.runtime.pids_limit,
        gpu_device_flag: settings.runtime.gpu_device_flag.clone(),
    };
    Ok(ServiceManager::new(
        runtime,
        probe,
        Arc::new(SystemClock),
        secrets,
        Arc::new(ToolkitGpu),
        config,
    ))
}
