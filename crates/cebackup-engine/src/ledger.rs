//! Content-addressed ledger of encrypted archives (`metadata.json`).
//!
//! The ledger maps the SHA256 of an uncompressed tar to the archive that
//! holds that content. It is loaded whole, mutated in memory and rewritten
//! whole; the rewrite goes through a temporary file in the same directory so
//! the file on disk is always a complete JSON document.

use crate::error::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the ledger file inside the backup directory.
pub const LEDGER_FILENAME: &str = "metadata.json";

/// One archive known to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Compressed archive filename (before encryption)
    pub archive: String,

    /// Encrypted archive filename; this is the file kept on disk
    pub encrypted: String,

    /// SHA256 of the uncompressed tar
    pub sha256: String,

    /// Creation instant, epoch seconds; never changes
    pub created: i64,

    /// Last time a run produced this content, epoch seconds
    pub touched: i64,
}

/// Metadata for a newly encrypted archive.
#[derive(Debug, Clone)]
pub struct NewArchive {
    pub archive: String,
    pub encrypted: String,
    pub created: i64,
}

/// In-memory view of `metadata.json`.
#[derive(Debug)]
pub struct Ledger {
    dir: PathBuf,
    entries: Vec<LedgerEntry>,
    by_hash: HashMap<String, usize>,
}

impl Ledger {
    /// Load the ledger of `dir`; a missing file yields an empty ledger.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let path = dir.join(LEDGER_FILENAME);

        let entries: Vec<LedgerEntry> = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => Vec::new(),
            Ok(content) => {
                serde_json::from_str(&content).map_err(|e| BackupError::ledger(&path, e))?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(BackupError::ledger(&path, e)),
        };
        debug!("Loaded {} checksums from {}", entries.len(), path.display());

        let mut ledger = Self {
            dir,
            entries,
            by_hash: HashMap::new(),
        };
        ledger.reindex();
        Ok(ledger)
    }

    fn reindex(&mut self) {
        self.by_hash = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.sha256.clone(), i))
            .collect();
    }

    /// Path of the ledger file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(LEDGER_FILENAME)
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Full path of an entry's encrypted archive.
    pub fn encrypted_path(&self, entry: &LedgerEntry) -> PathBuf {
        self.dir.join(&entry.encrypted)
    }

    /// Entry holding content with checksum `hash`.
    pub fn lookup(&self, hash: &str) -> Option<&LedgerEntry> {
        self.by_hash.get(hash).map(|&i| &self.entries[i])
    }

    /// Like [`Ledger::lookup`], but drops the entry if its encrypted archive
    /// no longer exists.
    pub fn lookup_existing(&mut self, hash: &str) -> Option<LedgerEntry> {
        let entry = self.lookup(hash)?.clone();
        if self.encrypted_path(&entry).is_file() {
            return Some(entry);
        }
        warn!(
            "Expected {} to exist, but it doesn't. Removing it from the ledger.",
            entry.encrypted
        );
        self.remove(hash);
        None
    }

    /// Entry whose encrypted archive is named like `path`'s filename.
    pub fn find_by_encrypted_name(&self, path: &Path) -> Option<&LedgerEntry> {
        let name = path.file_name()?.to_str()?;
        self.entries.iter().find(|e| e.encrypted == name)
    }

    /// Record content `hash`.
    ///
    /// Known content only gets its `touched` time set to `now`; new content
    /// is added with `created = touched = archive.created`.
    pub fn upsert(&mut self, hash: &str, archive: NewArchive, now: i64) -> &LedgerEntry {
        if let Some(&i) = self.by_hash.get(hash) {
            let entry = &mut self.entries[i];
            entry.touched = now;
            debug!("Update touched timestamp for {}", entry.encrypted);
            return &self.entries[i];
        }

        debug!("Store new archive: {}", archive.archive);
        self.entries.push(LedgerEntry {
            archive: archive.archive,
            encrypted: archive.encrypted,
            sha256: hash.to_string(),
            created: archive.created,
            touched: archive.created,
        });
        let index = self.entries.len() - 1;
        self.by_hash.insert(hash.to_string(), index);
        &self.entries[index]
    }

    /// Forget content `hash`.
    pub fn remove(&mut self, hash: &str) -> Option<LedgerEntry> {
        let index = self.by_hash.remove(hash)?;
        let entry = self.entries.remove(index);
        self.reindex();
        Some(entry)
    }

    /// True if an archive created after `since` still exists on disk.
    pub fn recent_backup_exists(&self, since: i64) -> bool {
        self.entries.iter().any(|entry| {
            let recent = entry.created > since && self.encrypted_path(entry).is_file();
            if recent {
                debug!("Backup newer than {} exists: {}", since, entry.encrypted);
            }
            recent
        })
    }

    /// Sort entries by `touched` and rewrite the ledger file.
    pub fn persist(&mut self) -> Result<()> {
        self.entries.sort_by_key(|e| e.touched);
        self.reindex();

        let path = self.path();
        let json =
            serde_json::to_string_pretty(&self.entries).map_err(|e| BackupError::ledger(&path, e))?;

        let write = |tmp: &mut tempfile::NamedTempFile| -> std::io::Result<()> {
            tmp.write_all(json.as_bytes())?;
            tmp.write_all(b"\n")?;
            tmp.as_file().sync_all()
        };

        let mut tmp =
            tempfile::NamedTempFile::new_in(&self.dir).map_err(|e| BackupError::ledger(&path, e))?;
        write(&mut tmp).map_err(|e| BackupError::ledger(&path, e))?;
        tmp.persist(&path)
            .map_err(|e| BackupError::ledger(&path, e.error))?;

        debug!("Wrote {} checksums to {}", self.entries.len(), path.display());
        Ok(())
    }
}
