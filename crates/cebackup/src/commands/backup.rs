//! Backup command

use anyhow::Result;
use cebackup_core::CebackupConfig;
use cebackup_engine::{
    call_hooks, days_to_secs, make_backup, BackupError, BackupOutcome, BackupRequest,
    GpgEncryptor, Ledger, RunContext, RunReport, DEFAULT_HOOK_TIMEOUT, SOURCES_FILENAME,
};
use std::fs::{self, DirBuilder};
use std::io::Write;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Slack taken off the `--skip-if-recent` window, so a run scheduled exactly
/// N days after the previous one is not skipped.
const RECENT_SLACK_SECS: i64 = 8 * 3600;

/// Time a gpg invocation may take
const ENCRYPT_TIMEOUT: Duration = Duration::from_secs(3600);

/// Oldest creation time (exclusive) that counts as recent for `days`.
pub fn recent_limit(now: i64, days: u64) -> i64 {
    now.saturating_sub(days_to_secs(days)).saturating_add(RECENT_SLACK_SECS)
}

/// True if the backup directory already holds a backup from the last `days`.
pub fn recent_backup_exists(config: &CebackupConfig, days: u64, now: i64) -> Result<bool> {
    if !config.local.directory.is_dir() {
        return Ok(false);
    }
    let ledger = Ledger::load(&config.local.directory)?;
    Ok(ledger.recent_backup_exists(recent_limit(now, days)))
}

/// Create the hook scratch directory, readable by the owner only.
///
/// An existing directory is an error: it belongs to another run, or to one
/// that crashed.
pub fn create_hook_tmpdir(path: &Path) -> std::result::Result<(), BackupError> {
    DirBuilder::new()
        .mode(0o700)
        .create(path)
        .map_err(|source| BackupError::HookDir {
            path: path.to_path_buf(),
            source,
        })
}

/// Write the collected paths, one per line, into the scratch directory.
pub fn write_sources_file(tmpdir: &Path, paths: &[PathBuf]) -> std::io::Result<PathBuf> {
    let path = tmpdir.join(SOURCES_FILENAME);
    let mut file = fs::File::create(&path)?;
    for source in paths {
        writeln!(file, "{}", source.display())?;
    }
    Ok(path)
}

/// What post hooks get to know about the run.
fn report_for(
    config: &CebackupConfig,
    outcome: Option<&BackupOutcome>,
    tmpdir: &Path,
    log_file: Option<&Path>,
) -> RunReport {
    let mut report = RunReport {
        log_file: log_file.map(Path::to_path_buf),
        ..RunReport::default()
    };
    let Some(outcome) = outcome else {
        return report;
    };

    report.ok = outcome.ok;
    report.created = outcome.created;
    report.backup_path = outcome
        .entry
        .as_ref()
        .map(|entry| config.local.directory.join(&entry.encrypted));
    if !outcome.paths.is_empty() {
        match write_sources_file(tmpdir, &outcome.paths) {
            Ok(path) => report.sources_file = Some(path),
            Err(e) => warn!("Failed to write {}: {}", SOURCES_FILENAME, e),
        }
    }
    report
}

/// Run one backup with pre and post hooks.
///
/// Post hooks run and the scratch directory is removed whether or not the
/// backup succeeded. Returns the run-level success flag.
pub async fn run(
    config: &CebackupConfig,
    timeout: Option<u64>,
    log_file: Option<&Path>,
) -> Result<bool> {
    let mut local = config.local.clone();
    if let Some(timeout) = timeout {
        local.timeout = timeout;
    }

    let tmpdir = config.hook_tmpdir.as_path();
    create_hook_tmpdir(tmpdir)?;
    let context = RunContext::new(tmpdir);
    debug!("Run {} uses {}", context.run_id(), tmpdir.display());

    info!("Start backup");
    let start = Instant::now();
    let encryptor = GpgEncryptor::new(local.recipient.clone(), ENCRYPT_TIMEOUT);
    let request = BackupRequest {
        config: &local,
        sources: &config.sources,
        pre_hooks: &config.pre_hooks,
        context: &context,
        hook_timeout: DEFAULT_HOOK_TIMEOUT,
    };
    let result = make_backup(&request, &encryptor).await;

    if let Ok(outcome) = &result {
        let elapsed = start.elapsed();
        if outcome.ok {
            info!("Backup finished in {:.1?}", elapsed);
        } else {
            error!("Backup finished with errors in {:.1?}", elapsed);
        }
    }

    let report = report_for(config, result.as_ref().ok(), tmpdir, log_file);
    if !config.post_hooks.is_empty() {
        let post = context.with_report(report);
        let hooks = call_hooks(&config.post_hooks, &post, DEFAULT_HOOK_TIMEOUT).await;
        if !hooks.all_ok {
            warn!("Some post hooks failed");
        }
    }

    debug!("Removing {}", tmpdir.display());
    if let Err(e) = fs::remove_dir_all(tmpdir) {
        warn!("Failed to remove {}: {}", tmpdir.display(), e);
    }

    Ok(result?.ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use cebackup_engine::{LedgerEntry, NewArchive};
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    const NOW: i64 = 1_700_000_000;

    fn config_in(dir: &Path) -> CebackupConfig {
        let yaml = format!(
            "local_backup:\n  directory: {}\n  gpg_public_key: user@example.com\n",
            dir.join("backups").display()
        );
        let path = Utf8PathBuf::from_path_buf(dir.join("cebackup.yaml")).unwrap();
        CebackupConfig::from_yaml(&yaml, &path).unwrap()
    }

    #[test]
    fn test_recent_limit_has_slack() {
        assert_eq!(recent_limit(NOW, 1), NOW - 86_400 + 8 * 3600);
        assert_eq!(recent_limit(NOW, 7), NOW - 7 * 86_400 + 8 * 3600);
    }

    #[test]
    fn test_recent_limit_with_huge_days() {
        let floor = NOW - i64::MAX + 8 * 3600;
        assert_eq!(recent_limit(NOW, 200_000_000_000_000), floor);
        assert_eq!(recent_limit(NOW, u64::MAX), floor);
        assert_eq!(recent_limit(i64::MIN, u64::MAX), i64::MIN + 8 * 3600);
    }

    #[test]
    fn test_recent_backup_exists() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());
        assert!(!recent_backup_exists(&config, 1, NOW).unwrap());

        let backups = &config.local.directory;
        fs::create_dir_all(backups).unwrap();
        let mut ledger = Ledger::load(backups).unwrap();
        let created = NOW - 10 * 3600;
        let encrypted = "backup_1699928000_20231114T023320.tar.gz.gpg".to_string();
        ledger.upsert(
            "c0ffee",
            NewArchive {
                archive: "backup_1699928000_20231114T023320.tar.gz".to_string(),
                encrypted: encrypted.clone(),
                created,
            },
            created,
        );
        ledger.persist().unwrap();
        assert!(!recent_backup_exists(&config, 1, NOW).unwrap());

        fs::write(backups.join(&encrypted), "x").unwrap();
        assert!(recent_backup_exists(&config, 1, NOW).unwrap());
        // a day minus the slack later it no longer counts
        assert!(!recent_backup_exists(&config, 1, NOW + 6 * 3600).unwrap());
    }

    #[test]
    fn test_hook_tmpdir_is_private_and_exclusive() {
        let dir = TempDir::new().unwrap();
        let tmpdir = dir.path().join("aux");
        create_hook_tmpdir(&tmpdir).unwrap();
        let mode = fs::metadata(&tmpdir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);

        let err = create_hook_tmpdir(&tmpdir).unwrap_err();
        assert!(matches!(err, BackupError::HookDir { .. }));
    }

    #[test]
    fn test_report_for_outcome() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());
        let outcome = BackupOutcome {
            ok: true,
            created: false,
            entry: Some(LedgerEntry {
                archive: "a.tar.gz".to_string(),
                encrypted: "a.tar.gz.gpg".to_string(),
                sha256: "c0ffee".to_string(),
                created: NOW,
                touched: NOW,
            }),
            paths: vec![PathBuf::from("/home/me/a"), PathBuf::from("/home/me/b")],
            failed: Vec::new(),
        };

        let report = report_for(&config, Some(&outcome), dir.path(), None);
        assert!(report.ok);
        assert!(!report.created);
        assert_eq!(
            report.backup_path,
            Some(config.local.directory.join("a.tar.gz.gpg"))
        );
        let sources = report.sources_file.unwrap();
        assert_eq!(fs::read_to_string(sources).unwrap(), "/home/me/a\n/home/me/b\n");
    }

    #[test]
    fn test_report_for_failed_run() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());
        let log = dir.path().join("cebackup.log");
        let report = report_for(&config, None, dir.path(), Some(&log));
        assert_eq!(
            report,
            RunReport {
                log_file: Some(log),
                ..RunReport::default()
            }
        );
    }

    #[tokio::test]
    async fn test_failed_run_still_runs_post_hooks_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(dir.path());
        config.hook_tmpdir = dir.path().join("aux");
        // nothing to archive makes the run fail
        config.sources.clear();

        let marker = dir.path().join("post-hook-ran");
        let hook = dir.path().join("post");
        fs::write(
            &hook,
            format!("#!/bin/sh\necho \"$CEBACKUP_OK\" > {}\n", marker.display()),
        )
        .unwrap();
        fs::set_permissions(&hook, fs::Permissions::from_mode(0o755)).unwrap();
        config.post_hooks = vec![hook];

        let result = run(&config, None, None).await;
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BackupError>(),
            Some(BackupError::EmptyArchive { .. })
        ));
        assert_eq!(fs::read_to_string(&marker).unwrap(), "0\n");
        assert!(!config.hook_tmpdir.exists());
    }
}
