//! cebackup - scheduled, deduplicating, encrypted local backups
//!
//! This is the main entry point for the cebackup command-line interface.

mod cli;
mod commands;
mod logging;

use cebackup_core::{CebackupConfig, CONFIG_ERROR_EXIT_CODE};
use cebackup_engine::BackupError;
use chrono::Utc;
use clap::Parser;
use tracing::{debug, error, info};

use cli::Cli;
use logging::{init_tracing, LogSettings};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    std::process::exit(run(cli).await);
}

/// Run the command line and return the process exit code.
async fn run(cli: Cli) -> i32 {
    let config = match CebackupConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            // logging is configured by the file that just failed to load
            let settings = LogSettings::resolve(cli.level_override(), None, None, None, true);
            let _ = init_tracing(&settings);
            error!("{}", e);
            return e.exit_code();
        }
    };

    let settings = LogSettings::resolve(
        cli.level_override(),
        config.log_level.as_deref(),
        cli.log_file.as_deref(),
        config.log_file.as_deref(),
        cli.log_stdout,
    );
    if let Err(e) = init_tracing(&settings) {
        eprintln!("Cannot open log file: {}", e);
        return 1;
    }
    debug!("Loaded {}", config.config_path);

    let result = if cli.prune_backup_dir {
        commands::prune::run(&config)
    } else {
        backup_unless_recent(&cli, &config, &settings).await
    };

    match result {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            error!("{:#}", e);
            exit_code(&e)
        }
    }
}

async fn backup_unless_recent(
    cli: &Cli,
    config: &CebackupConfig,
    settings: &LogSettings,
) -> anyhow::Result<bool> {
    if let Some(days) = cli.skip_if_recent {
        let now = Utc::now().timestamp();
        if commands::backup::recent_backup_exists(config, days, now)? {
            info!("A backup from the last {} days exists, skipping", days);
            return Ok(true);
        }
    }
    commands::backup::run(config, cli.timeout, settings.file.as_deref()).await
}

fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(e) = err.downcast_ref::<BackupError>() {
        e.exit_code()
    } else if err.downcast_ref::<cebackup_core::Error>().is_some() {
        CONFIG_ERROR_EXIT_CODE
    } else {
        1
    }
}
