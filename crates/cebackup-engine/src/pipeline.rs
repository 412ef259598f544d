//! The backup run: collect, archive, deduplicate, encrypt, prune.

use crate::archive::{Archive, ArchiveName};
use crate::context::RunContext;
use crate::encrypt::{encrypt_archive, Encryptor};
use crate::error::Result;
use crate::hooks::call_hooks;
use crate::ledger::{Ledger, LedgerEntry, NewArchive};
use crate::retention::prune_at;
use crate::sources::{collect_sources, merge_paths};
use cebackup_core::{LocalBackupConfig, SourceSpec};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Inputs of one backup run.
#[derive(Debug, Clone, Copy)]
pub struct BackupRequest<'a> {
    pub config: &'a LocalBackupConfig,
    pub sources: &'a [SourceSpec],
    pub pre_hooks: &'a [PathBuf],
    pub context: &'a RunContext,
    pub hook_timeout: Duration,
}

/// Result of a backup run that did not fail fatally.
#[derive(Debug, Clone, Default)]
pub struct BackupOutcome {
    /// No hook failed and every path was archived
    pub ok: bool,

    /// A new encrypted archive was written
    pub created: bool,

    /// Ledger entry holding this run's content
    pub entry: Option<LedgerEntry>,

    /// Every collected path, sorted
    pub paths: Vec<PathBuf>,

    /// Paths that could not be archived
    pub failed: Vec<PathBuf>,
}

/// Run a backup, naming the archive after the current instant.
pub async fn make_backup(
    request: &BackupRequest<'_>,
    encryptor: &dyn Encryptor,
) -> Result<BackupOutcome> {
    let name = ArchiveName::now(&request.config.archive_prefix);
    make_backup_as(request, encryptor, name).await
}

/// Run a backup into an archive called `name`.
///
/// The archive's creation instant doubles as the run's clock: it is the
/// `touched` time recorded in the ledger and the reference for pruning.
pub async fn make_backup_as(
    request: &BackupRequest<'_>,
    encryptor: &dyn Encryptor,
    name: ArchiveName,
) -> Result<BackupOutcome> {
    let config = request.config;
    let dir = &config.directory;
    debug!(
        "directory: {}, recipient: {}, prune: {:?}",
        dir.display(),
        config.recipient,
        config.prune
    );

    fs::create_dir_all(dir)?;
    let mut ledger = Ledger::load(dir)?;

    let mut paths = collect_sources(request.sources)?;
    let mut hooks_ok = true;
    if !request.pre_hooks.is_empty() {
        let hooks = call_hooks(request.pre_hooks, request.context, request.hook_timeout).await;
        hooks_ok = hooks.all_ok;
        paths = merge_paths(paths, hooks.paths);
    }
    debug!("{} paths to include in archive", paths.len());

    let timeout = Duration::from_secs(config.timeout);
    let mut archive = Archive::with_name(dir, name, config.compression)
        .with_ignore_file(config.ignore_file.clone());
    debug!("Create archive {}", archive.name());

    // a timeout too large to represent means no deadline
    let deadline = Instant::now().checked_add(timeout);
    let abandoned = archive.append_all(&paths, deadline).await;
    if abandoned > 0 {
        error!("Timeout ({} sec) reached", config.timeout);
    }
    let now = archive.created();
    let checksum = archive.checksum()?;

    let mut outcome = BackupOutcome {
        ok: false,
        created: false,
        entry: None,
        failed: archive.failed().to_vec(),
        paths,
    };
    outcome.ok = hooks_ok && outcome.failed.is_empty();

    if let Some(existing) = ledger.lookup_existing(&checksum) {
        let existing_path = ledger.encrypted_path(&existing);
        info!(
            "A backup with the same checksum already exists: {}, skipping.",
            existing_path.display()
        );
        touch(&existing_path);
        archive.unlink();
        let new = new_archive(&archive);
        outcome.entry = Some(ledger.upsert(&checksum, new, now).clone());
        ledger.persist()?;
    } else {
        let compressed = archive.compress(timeout).await?;
        let encrypted = archive.encrypted_path();
        encrypt_archive(encryptor, &compressed, &encrypted).await?;
        archive.unlink();

        let new = new_archive(&archive);
        outcome.entry = Some(ledger.upsert(&checksum, new, now).clone());
        outcome.created = true;
        ledger.persist()?;
    }

    if !outcome.failed.is_empty() {
        error!("Failed to archive some paths: {:?}", outcome.failed);
        return Ok(outcome);
    }

    if let Some(policy) = &config.prune {
        prune_at(dir, policy, &config.archive_prefix, now)?;
    }
    Ok(outcome)
}

fn new_archive(archive: &Archive) -> NewArchive {
    NewArchive {
        archive: file_name(&archive.compressed_path()),
        encrypted: file_name(&archive.encrypted_path()),
        created: archive.created(),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Refresh the modification time of a deduplicated archive.
fn touch(path: &Path) {
    let result = fs::File::options()
        .write(true)
        .open(path)
        .and_then(|file| file.set_modified(SystemTime::now()));
    if let Err(e) = result {
        warn!("Failed to touch {}: {}", path.display(), e);
    }
}
