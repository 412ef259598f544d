//! Retention of encrypted archives.
//!
//! Walking archives newest first:
//! 1. the `keep_archives` newest files are never touched;
//! 2. the newest remaining file of each calendar month (UTC) is kept;
//! 3. a file unknown to the ledger is left alone;
//! 4. anything else is deleted once its `touched` time is older than
//!    `keep_days`.

use crate::archive::{archive_month, ENCRYPTED_EXTENSION};
use crate::error::Result;
use crate::ledger::Ledger;
use cebackup_core::RetentionPolicy;
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

const SECONDS_PER_DAY: i64 = 86_400;

/// What a prune run did with each archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Newest archives skipped unconditionally
    pub kept_recent: Vec<PathBuf>,

    /// Latest archive of a month
    pub kept_monthly: Vec<PathBuf>,

    /// Touched within `keep_days`
    pub kept_fresh: Vec<PathBuf>,

    /// No ledger entry, left alone
    pub unknown: Vec<PathBuf>,

    /// Deleted from disk and ledger
    pub deleted: Vec<PathBuf>,
}

/// Encrypted archives with `prefix` in `dir`, newest first.
pub fn list_encrypted_archives(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let head = format!("{}_", prefix);
    let tail = format!(".{}", ENCRYPTED_EXTENSION);

    let mut archives: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with(&head) && name.ends_with(&tail)
        })
        .map(|entry| entry.path())
        .collect();
    archives.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
    Ok(archives)
}

/// Prune `dir` against the current time.
pub fn prune(dir: &Path, policy: &RetentionPolicy, prefix: &str) -> Result<PruneReport> {
    prune_at(dir, policy, prefix, Utc::now().timestamp())
}

/// Prune `dir` as if the current time were `now` (epoch seconds).
///
/// Filenames are validated before anything is deleted; the ledger is
/// rewritten once at the end.
pub fn prune_at(
    dir: &Path,
    policy: &RetentionPolicy,
    prefix: &str,
    now: i64,
) -> Result<PruneReport> {
    let mut report = PruneReport::default();
    if !dir.is_dir() {
        warn!("No such directory: {}", dir.display());
        return Ok(report);
    }

    let mut ledger = Ledger::load(dir)?;
    let archives = list_encrypted_archives(dir, prefix)?;
    let split = policy.keep_archives.min(archives.len());
    let (recent, candidates) = archives.split_at(split);
    report.kept_recent = recent.to_vec();

    let candidates = candidates
        .iter()
        .map(|path| archive_month(path).map(|month| (path, month)))
        .collect::<Result<Vec<_>>>()?;

    let age_limit = now.saturating_sub(days_to_secs(policy.keep_days));
    debug!("Delete backup archives touched before {}", format_ts(age_limit));

    let mut monthly: HashMap<(i32, u32), &PathBuf> = HashMap::new();
    for (path, month) in candidates {
        debug!("Consider for deletion: {}", path.display());

        if let std::collections::hash_map::Entry::Vacant(slot) = monthly.entry(month) {
            debug!(
                "Keep latest backup from month {}-{}: {}",
                month.0,
                month.1,
                path.display()
            );
            slot.insert(path);
            report.kept_monthly.push(path.clone());
            continue;
        }

        let Some(entry) = ledger.find_by_encrypted_name(path).cloned() else {
            warn!("No metadata found for {}", path.display());
            report.unknown.push(path.clone());
            continue;
        };

        if entry.touched < age_limit {
            info!("Removing {}, last touched {}", path.display(), format_ts(entry.touched));
            if let Err(e) = fs::remove_file(path) {
                error!("Failed to remove {}: {}", path.display(), e);
                continue;
            }
            ledger.remove(&entry.sha256);
            report.deleted.push(path.clone());
        } else {
            debug!(
                "Not deleting {}, last touched {}",
                path.display(),
                format_ts(entry.touched)
            );
            report.kept_fresh.push(path.clone());
        }
    }

    ledger.persist()?;
    Ok(report)
}

/// `days` in seconds, clamped to `i64::MAX`.
pub fn days_to_secs(days: u64) -> i64 {
    i64::try_from(days)
        .unwrap_or(i64::MAX)
        .saturating_mul(SECONDS_PER_DAY)
}

fn format_ts(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}
