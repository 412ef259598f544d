//! CLI argument parsing with clap

use camino::Utf8PathBuf;
use cebackup_core::DEFAULT_CONFIG_FILE;
use clap::Parser;
use std::path::PathBuf;

/// Scheduled, deduplicating, encrypted local backups.
///
/// Archives the configured sources and the paths printed by pre hooks into a
/// tar archive, skips it when identical content is already stored, otherwise
/// compresses and encrypts it, then prunes old archives.
#[derive(Parser, Debug)]
#[command(name = "cebackup")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: Utf8PathBuf,

    /// Log at debug level, with source locations
    #[arg(long)]
    pub debug: bool,

    /// Log at info level
    #[arg(short, long)]
    pub verbose: bool,

    /// Time budget in seconds for archiving all paths
    #[arg(long, value_name = "SECONDS", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    /// Log to file (append) instead of stdout
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Log to stdout, overriding log_file from the config
    #[arg(long)]
    pub log_stdout: bool,

    /// Do nothing if the backup directory holds a backup from the last DAYS
    #[arg(
        long,
        value_name = "DAYS",
        num_args = 0..=1,
        default_missing_value = "1",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub skip_if_recent: Option<u64>,

    /// Only prune the backup directory, do not create a backup
    #[arg(long)]
    pub prune_backup_dir: bool,
}

impl Cli {
    /// Log level forced by flags, if any.
    pub fn level_override(&self) -> Option<&'static str> {
        if self.debug {
            Some("debug")
        } else if self.verbose {
            Some("info")
        } else {
            None
        }
    }
}
