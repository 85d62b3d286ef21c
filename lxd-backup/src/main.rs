//! lxd-backup - Main entry point
//!
//! Backs up one LXD container to an rclone remote and exits with 0 on
//! success, 1 on a failed stage, 2 on usage or precondition errors and 130
//! when interrupted.

use chrono::Local;
use clap::Parser;
use lxd_backup::job::naming::NamingScheme;
use lxd_backup::runtime::LxcRuntime;
use lxd_backup::shutdown::ShutdownCoordinator;
use lxd_backup::storage::RcloneStorage;
use lxd_backup::{utils, Config, Orchestrator};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Container to back up
    #[arg(required_unless_present = "print_config")]
    container: Option<String>,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", env = "LXD_BACKUP_CONFIG")]
    config: Option<PathBuf>,

    /// Staging directory for the exported archive (overrides config)
    #[arg(short, long, value_name = "DIR")]
    work_dir: Option<PathBuf>,

    /// rclone remote name (overrides config)
    #[arg(short, long)]
    remote: Option<String>,

    /// Base directory on the remote (overrides config)
    #[arg(long, value_name = "PATH")]
    remote_path: Option<String>,

    /// Artifact naming scheme: plain or with-network (overrides config)
    #[arg(long)]
    naming: Option<NamingScheme>,

    /// Skip the remote size check after upload
    #[arg(long)]
    no_verify: bool,

    /// Write a run report and upload it next to the archive
    #[arg(long)]
    report: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(dir) = &self.work_dir {
            config.backup.work_dir = dir.clone();
        }
        if let Some(remote) = &self.remote {
            config.storage.remote = remote.clone();
        }
        if let Some(path) = &self.remote_path {
            config.storage.path = path.clone();
        }
        if let Some(naming) = self.naming {
            config.backup.naming = naming;
        }
        if self.no_verify {
            config.storage.verify_upload = false;
        }
        if self.report {
            config.backup.report = true;
        }
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let mut config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(e.exit_code());
        }
    };
    args.apply(&mut config);

    if args.print_config {
        return match config.to_toml() {
            Ok(rendered) => {
                print!("{}", rendered);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}", e);
                ExitCode::from(e.exit_code())
            }
        };
    }

    // Initialize logging
    if let Err(e) = utils::logger::init(&config.log.level) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let Some(container) = args.container else {
        return ExitCode::from(2);
    };

    tracing::info!(
        "Starting lxd-backup v{} for container {}",
        env!("CARGO_PKG_VERSION"),
        container
    );

    // Signals cancel the run; cleanup still happens inside the orchestrator
    let cancel = CancellationToken::new();
    let signals = tokio::spawn(ShutdownCoordinator::new(cancel.clone()).watch());

    let orchestrator = Orchestrator::new(
        LxcRuntime::new(&config.runtime),
        RcloneStorage::new(&config.storage),
        config,
    );
    let outcome = orchestrator.run(&container, Local::now(), &cancel).await;

    signals.abort();

    ExitCode::from(outcome.exit_code())
}
