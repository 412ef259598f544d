//! Prune-only command

use anyhow::Result;
use cebackup_core::CebackupConfig;
use cebackup_engine::prune;
use tracing::{info, warn};

/// Apply the configured retention policy to the backup directory.
///
/// Returns false when no policy is configured.
pub fn run(config: &CebackupConfig) -> Result<bool> {
    let Some(policy) = &config.local.prune else {
        warn!("Backup pruning not configured");
        return Ok(false);
    };

    let report = prune(&config.local.directory, policy, &config.local.archive_prefix)?;
    info!(
        "Pruned {}: {} deleted, {} kept",
        config.local.directory.display(),
        report.deleted.len(),
        report.kept_recent.len()
            + report.kept_monthly.len()
            + report.kept_fresh.len()
            + report.unknown.len()
    );
    Ok(true)
}
