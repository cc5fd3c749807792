//! Installer init binary.
//!
//! Runs as PID 1 of the installation environment. Installed as `halt`,
//! `poweroff` or `reboot`, it signals the running init instead.

use clap::{Parser, Subcommand};
use loader_init::{signal_supervisor, AuxCommand, Init, InitConfig, KillSender};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "init",
    about = "Installer environment init - PID 1 boot orchestration",
    version,
    author
)]
struct Cli {
    /// Don't require running as PID 1
    #[arg(long)]
    no_pid1: bool,

    /// Don't mount virtual filesystems
    #[arg(long)]
    no_mount: bool,

    /// PID file location
    #[arg(long, default_value = loader_init::pidfile::DEFAULT_PID_FILE)]
    pid_file: PathBuf,

    /// Installer binary
    #[arg(long, default_value = loader_init::install::DEFAULT_INSTALLER)]
    installer: PathBuf,

    /// Test arguments: `serial`, `rescue`
    args: Vec<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the running init to shut the system down
    Shutdown {
        /// Shutdown type
        #[arg(value_enum, default_value = "poweroff")]
        shutdown_type: AuxCommand,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let argv0 = std::env::args().next().unwrap_or_default();
    if let Some(command) = AuxCommand::from_program_name(&argv0) {
        request_shutdown(Path::new(loader_init::pidfile::DEFAULT_PID_FILE), command);
        return Ok(());
    }

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Shutdown { shutdown_type }) => {
            request_shutdown(&cli.pid_file, shutdown_type);
        }
        None => run_init(cli).await?,
    }

    Ok(())
}

/// Signal the running init. Failures are reported; the exit status is
/// always success.
fn request_shutdown(pid_file: &Path, command: AuxCommand) {
    match signal_supervisor(pid_file, command, &KillSender) {
        Ok(pid) => info!(pid = pid.as_raw(), "Signalled init"),
        Err(e) => error!(error = %e, "Unable to signal init"),
    }
}

/// Run as the init system.
async fn run_init(cli: Cli) -> anyhow::Result<()> {
    let config = InitConfig {
        pid_file: cli.pid_file,
        installer: cli.installer,
        args: cli.args,
        mount_filesystems: !cli.no_mount,
        require_pid1: !cli.no_pid1,
        ..InitConfig::default()
    };

    let mut init = Init::new(config)?;
    init.run().await?;

    Ok(())
}
