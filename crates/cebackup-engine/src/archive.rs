//! Archive naming and incremental tar construction.
//!
//! An archive is built by calling `tar` once per path: the first successful
//! call creates the file, later calls append to it. This lets the run check
//! its global deadline between paths. The finished tar is compressed in place
//! by an external program.

use crate::checksum::calculate_checksum;
use crate::error::{BackupError, Result};
use crate::process::{run_with_timeout, CommandError};
use cebackup_core::Compression;
use chrono::{DateTime, Datelike, Local, TimeZone, Utc};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Default time a single `tar` invocation may take
pub const DEFAULT_APPEND_TIMEOUT: Duration = Duration::from_secs(60);

/// Default per-directory ignore file
pub const DEFAULT_IGNORE_FILE: &str = ".cebackup";

/// Suffix of encrypted archives
pub const ENCRYPTED_EXTENSION: &str = "gpg";

fn archive_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[\w-]*?_(\d{10})_\d{8}T\d{6}\.tar(\.\w+)*$").expect("valid archive regex")
    })
}

/// Name of an archive, fixed at the instant the archive was started.
///
/// Rendered as `{prefix}_{epoch-seconds}_{YYYYMMDDThhmmss}.tar`. Both time
/// components come from the same instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveName {
    prefix: String,
    created: i64,
    stamp: String,
}

impl ArchiveName {
    /// Name an archive created at `instant`; the readable stamp uses the
    /// instant's own time zone.
    pub fn at<Tz>(prefix: &str, instant: &DateTime<Tz>) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        Self {
            prefix: prefix.to_string(),
            created: instant.timestamp(),
            stamp: instant.format("%Y%m%dT%H%M%S").to_string(),
        }
    }

    /// Name an archive created now, with a local-time stamp.
    pub fn now(prefix: &str) -> Self {
        Self::at(prefix, &Local::now())
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Creation instant in epoch seconds.
    pub fn created(&self) -> i64 {
        self.created
    }

    /// Filename of the uncompressed tar.
    pub fn tar_name(&self) -> String {
        format!("{}_{}_{}.tar", self.prefix, self.created, self.stamp)
    }
}

impl std::fmt::Display for ArchiveName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.tar_name())
    }
}

/// Extract the creation instant (epoch seconds) from an archive filename.
pub fn archive_timestamp(path: &Path) -> Result<i64> {
    let invalid = || BackupError::InvalidArchiveName {
        path: path.to_path_buf(),
    };
    let name = path.file_name().and_then(|n| n.to_str()).ok_or_else(invalid)?;
    let caps = archive_name_regex().captures(name).ok_or_else(invalid)?;
    caps[1].parse::<i64>().map_err(|_| invalid())
}

/// Calendar month `(year, month)` in UTC of an archive, from its filename.
pub fn archive_month(path: &Path) -> Result<(i32, u32)> {
    let ts = archive_timestamp(path)?;
    let instant = Utc
        .timestamp_opt(ts, 0)
        .single()
        .ok_or_else(|| BackupError::InvalidArchiveName {
            path: path.to_path_buf(),
        })?;
    Ok((instant.year(), instant.month()))
}

/// Outcome of appending one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Added,
    Failed,
}

/// An archive under construction in the backup directory.
#[derive(Debug)]
pub struct Archive {
    dir: PathBuf,
    name: ArchiveName,
    compression: Compression,
    ignore_file: String,
    append_timeout: Duration,
    added: Vec<PathBuf>,
    failed: Vec<PathBuf>,
}

impl Archive {
    /// Start a new archive in `dir`, named after the current instant.
    pub fn begin(dir: impl Into<PathBuf>, prefix: &str, compression: Compression) -> Self {
        Self::with_name(dir, ArchiveName::now(prefix), compression)
    }

    /// Start a new archive with an explicit name.
    pub fn with_name(dir: impl Into<PathBuf>, name: ArchiveName, compression: Compression) -> Self {
        Self {
            dir: dir.into(),
            name,
            compression,
            ignore_file: DEFAULT_IGNORE_FILE.to_string(),
            append_timeout: DEFAULT_APPEND_TIMEOUT,
            added: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Sets the per-directory ignore file honored by tar.
    pub fn with_ignore_file(mut self, ignore_file: impl Into<String>) -> Self {
        self.ignore_file = ignore_file.into();
        self
    }

    /// Sets the time a single tar invocation may take.
    pub fn with_append_timeout(mut self, timeout: Duration) -> Self {
        self.append_timeout = timeout;
        self
    }

    pub fn name(&self) -> &ArchiveName {
        &self.name
    }

    /// Creation instant in epoch seconds.
    pub fn created(&self) -> i64 {
        self.name.created()
    }

    pub fn tar_path(&self) -> PathBuf {
        self.dir.join(self.name.tar_name())
    }

    /// Path of the compressed archive (exists after [`Archive::compress`]).
    pub fn compressed_path(&self) -> PathBuf {
        self.dir.join(format!(
            "{}.{}",
            self.name.tar_name(),
            self.compression.extension()
        ))
    }

    /// Path of the encrypted archive.
    pub fn encrypted_path(&self) -> PathBuf {
        let compressed = self.compressed_path();
        let mut name = compressed
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".");
        name.push(ENCRYPTED_EXTENSION);
        self.dir.join(name)
    }

    /// Paths successfully added so far.
    pub fn added(&self) -> &[PathBuf] {
        &self.added
    }

    /// Paths that could not be added.
    pub fn failed(&self) -> &[PathBuf] {
        &self.failed
    }

    fn tar_command(&self, path: &Path) -> Command {
        let mut cmd = Command::new("tar");
        cmd.arg(if self.added.is_empty() {
            "--create"
        } else {
            "--append"
        });
        cmd.args(["--exclude-vcs", "--exclude-vcs-ignores"]);
        cmd.arg(format!("--exclude-ignore-recursive={}", self.ignore_file));
        cmd.arg("--verbose");
        cmd.arg("--file");
        cmd.arg(self.tar_path());
        cmd.arg(path);
        cmd
    }

    /// Add one path to the archive.
    ///
    /// A tar failure or timeout marks the path failed; the archive stays
    /// usable for further paths.
    pub async fn append(&mut self, path: &Path) -> AppendOutcome {
        debug!("Add {} to {}", path.display(), self.name);
        let cmd = self.tar_command(path);
        match run_with_timeout(cmd, self.append_timeout).await {
            Ok(output) => {
                debug!("tar stdout: {}", output.stdout.trim_end());
                self.added.push(path.to_path_buf());
                AppendOutcome::Added
            }
            Err(CommandError::TimedOut { timeout, .. }) => {
                error!(
                    "Timed out after {:?} while adding {} to {}",
                    timeout,
                    path.display(),
                    self.name
                );
                self.failed.push(path.to_path_buf());
                AppendOutcome::Failed
            }
            Err(e) => {
                error!("Failed to add {}: {}", path.display(), e);
                self.failed.push(path.to_path_buf());
                AppendOutcome::Failed
            }
        }
    }

    /// Add paths in order until `deadline`; `None` never expires.
    ///
    /// Once the deadline has passed, the next path is marked failed and the
    /// rest are not attempted. Returns the number of abandoned paths.
    pub async fn append_all(&mut self, paths: &[PathBuf], deadline: Option<Instant>) -> usize {
        for (index, path) in paths.iter().enumerate() {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                let abandoned = paths.len() - index - 1;
                error!(
                    "Archiving deadline reached at {}, {} more paths not attempted",
                    path.display(),
                    abandoned
                );
                self.failed.push(path.clone());
                return abandoned;
            }
            self.append(path).await;
        }
        0
    }

    /// SHA256 of the uncompressed tar.
    pub fn checksum(&self) -> Result<String> {
        let tar_path = self.tar_path();
        if self.added.is_empty() || !tar_path.is_file() {
            return Err(BackupError::EmptyArchive { path: tar_path });
        }
        Ok(calculate_checksum(&tar_path)?)
    }

    /// Compress the tar in place; the uncompressed file is replaced.
    pub async fn compress(&self, timeout: Duration) -> Result<PathBuf> {
        let tar_path = self.tar_path();
        let mut cmd = Command::new(self.compression.program());
        cmd.arg(&tar_path);
        debug!("Compressing archive: {}", crate::process::describe(&cmd));

        if let Err(source) = run_with_timeout(cmd, timeout).await {
            error!("Failed to compress archive {}: {}", tar_path.display(), source);
            return Err(BackupError::Compression {
                path: tar_path,
                source,
            });
        }

        let compressed = self.compressed_path();
        if !compressed.is_file() {
            return Err(BackupError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} did not produce {}", self.compression, compressed.display()),
            )));
        }
        Ok(compressed)
    }

    /// Remove the unencrypted intermediates (tar and compressed tar).
    pub fn unlink(&self) {
        for target in [self.tar_path(), self.compressed_path()] {
            match std::fs::remove_file(&target) {
                Ok(()) => debug!("Removed {}", target.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", target.display(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::fs::{self, File};
    use tempfile::TempDir;

    // 2021-01-01T00:00:00Z
    const NEW_YEAR: i64 = 1_609_459_200;

    fn name_at(prefix: &str, ts: i64) -> ArchiveName {
        ArchiveName::at(prefix, &Utc.timestamp_opt(ts, 0).unwrap())
    }

    fn tar_entries(path: &Path) -> Vec<String> {
        let mut archive = tar::Archive::new(File::open(path).unwrap());
        archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_archive_name() {
        let name = name_at("foo", NEW_YEAR);
        assert_eq!(name.tar_name(), "foo_1609459200_20210101T000000.tar");
        assert_eq!(name.created(), NEW_YEAR);

        let archive = Archive::with_name("/backups", name, Compression::Bzip2);
        assert_eq!(
            archive.compressed_path(),
            PathBuf::from("/backups/foo_1609459200_20210101T000000.tar.bz2")
        );
        assert_eq!(
            archive.encrypted_path(),
            PathBuf::from("/backups/foo_1609459200_20210101T000000.tar.bz2.gpg")
        );
    }

    #[test]
    fn test_archive_month_from_filename() {
        let cases = [
            ("foo-bar-baz_1545606000_20181224T000000.tar", (2018, 12)),
            ("foo-bar-baz_1545606000_19000000T000000.tar.gz", (2018, 12)),
            ("_1610665200_20210115T000000.tar.bz2.gpg", (2021, 1)),
            ("_1612688337_20210207T000000.tar.gz.gpg", (2021, 2)),
            ("my_host_1612688337_20210207T000000.tar.xz.gpg", (2021, 2)),
        ];
        for (filename, month) in cases {
            let path = Path::new("/backup-dir").join(filename);
            assert_eq!(archive_month(&path).unwrap(), month, "{}", filename);
        }
    }

    #[test]
    fn test_invalid_archive_names() {
        for filename in [
            "metadata.json",
            "foo_123_20210101T000000.tar.gz.gpg",
            "foo_1609459200_20210101.tar.gz.gpg",
            "foo_1609459200_20210101T000000.zip",
        ] {
            let err = archive_month(Path::new(filename)).unwrap_err();
            assert!(matches!(err, BackupError::InvalidArchiveName { .. }), "{}", filename);
        }
    }

    #[test]
    fn test_month_round_trip() {
        for ts in [0_i64, 1_000_000_000, NEW_YEAR - 1, NEW_YEAR, 1_700_000_000, 1_893_456_000] {
            let instant = Utc.timestamp_opt(ts, 0).unwrap();
            let name = ArchiveName::at("rt", &instant);
            if ts < 1_000_000_000 {
                // fewer than ten digits never round-trips through the grammar
                assert!(archive_month(Path::new(&name.tar_name())).is_err());
                continue;
            }
            let month = archive_month(Path::new(&format!("{}.gz.gpg", name))).unwrap();
            assert_eq!(month, (instant.year(), instant.month()));
        }
    }

    #[tokio::test]
    async fn test_incremental_archive_and_compress() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        for f in ["alpha.txt", "bravo.txt"] {
            fs::write(src.path().join(f), "back this up").unwrap();
        }

        let mut archive =
            Archive::with_name(out.path(), name_at("foo", NEW_YEAR), Compression::Gzip);
        let deadline = Instant::now() + Duration::from_secs(60);
        let abandoned = archive
            .append_all(
                &[src.path().join("alpha.txt"), src.path().join("bravo.txt")],
                Some(deadline),
            )
            .await;
        assert_eq!(abandoned, 0);
        assert_eq!(archive.added().len(), 2);
        assert!(archive.failed().is_empty());

        let entries = tar_entries(&archive.tar_path());
        assert_eq!(entries.len(), 2);
        assert!(entries[0].ends_with("alpha.txt"));
        assert!(entries[1].ends_with("bravo.txt"));
        assert_eq!(archive.checksum().unwrap().len(), 64);

        let compressed = archive.compress(Duration::from_secs(30)).await.unwrap();
        assert!(compressed.exists());
        assert!(!archive.tar_path().exists());

        let mut unpacked = tar::Archive::new(GzDecoder::new(File::open(&compressed).unwrap()));
        assert_eq!(unpacked.entries().unwrap().count(), 2);

        archive.unlink();
        assert!(!compressed.exists());
    }

    #[tokio::test]
    async fn test_failed_path_does_not_abort() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        fs::write(src.path().join("present"), "data").unwrap();

        let mut archive =
            Archive::with_name(out.path(), name_at("foo", NEW_YEAR), Compression::Gzip);
        let missing = src.path().join("missing");
        let present = src.path().join("present");
        archive.append(&missing).await;
        archive.append(&present).await;

        assert_eq!(archive.failed(), &[missing]);
        assert_eq!(archive.added(), &[present]);
        assert_eq!(tar_entries(&archive.tar_path()).len(), 1);
    }

    #[tokio::test]
    async fn test_deadline_abandons_remaining_paths() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let paths: Vec<PathBuf> = (0..3)
            .map(|i| {
                let p = src.path().join(format!("f{}", i));
                fs::write(&p, "x").unwrap();
                p
            })
            .collect();

        let mut archive =
            Archive::with_name(out.path(), name_at("foo", NEW_YEAR), Compression::Gzip);
        let abandoned = archive.append_all(&paths, Some(Instant::now())).await;

        assert_eq!(abandoned, 2);
        assert_eq!(archive.failed(), &paths[..1]);
        assert!(archive.added().is_empty());
        assert!(matches!(
            archive.checksum(),
            Err(BackupError::EmptyArchive { .. })
        ));
    }

    #[tokio::test]
    async fn test_append_timeout_fails_each_path() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let paths: Vec<PathBuf> = (0..3)
            .map(|i| {
                let p = src.path().join(format!("f{}", i));
                fs::write(&p, "x").unwrap();
                p
            })
            .collect();

        // tar cannot finish before a zero timeout expires
        let mut archive =
            Archive::with_name(out.path(), name_at("foo", NEW_YEAR), Compression::Gzip)
                .with_append_timeout(Duration::ZERO);
        assert_eq!(archive.append(&paths[0]).await, AppendOutcome::Failed);
        assert_eq!(archive.failed(), &paths[..1]);

        // a timed-out path does not stop the remaining ones from being tried
        let abandoned = archive.append_all(&paths[1..], None).await;
        assert_eq!(abandoned, 0);
        assert_eq!(archive.failed(), &paths[..]);
        assert!(archive.added().is_empty());
    }

    #[tokio::test]
    async fn test_vcs_and_ignore_file_excluded() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let project = src.path().join("project");
        fs::create_dir_all(project.join(".git")).unwrap();
        fs::write(project.join(".git/HEAD"), "ref: refs/heads/main").unwrap();
        fs::write(project.join("keep.txt"), "keep").unwrap();
        fs::write(project.join("secret.txt"), "secret").unwrap();
        fs::write(project.join(".cebackup"), "secret.txt\n").unwrap();

        let mut archive =
            Archive::with_name(out.path(), name_at("foo", NEW_YEAR), Compression::Gzip);
        assert_eq!(archive.append(&project).await, AppendOutcome::Added);

        let entries = tar_entries(&archive.tar_path());
        assert!(entries.iter().any(|e| e.ends_with("keep.txt")));
        assert!(!entries.iter().any(|e| e.contains(".git")));
        assert!(!entries.iter().any(|e| e.ends_with("secret.txt")));
    }

    #[tokio::test]
    async fn test_same_content_same_checksum_across_instants() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        fs::write(src.path().join("data"), "identical").unwrap();
        let paths = [src.path().join("data")];
        let deadline = Instant::now() + Duration::from_secs(60);

        let mut first =
            Archive::with_name(out.path(), name_at("foo", NEW_YEAR), Compression::Gzip);
        first.append_all(&paths, Some(deadline)).await;
        let mut second =
            Archive::with_name(out.path(), name_at("foo", NEW_YEAR + 3600), Compression::Xz);
        second.append_all(&paths, Some(deadline)).await;

        assert_ne!(first.tar_path(), second.tar_path());
        assert_eq!(first.checksum().unwrap(), second.checksum().unwrap());
    }

    #[tokio::test]
    async fn test_compress_failure_is_fatal() {
        let out = TempDir::new().unwrap();
        let archive =
            Archive::with_name(out.path(), name_at("foo", NEW_YEAR), Compression::Gzip);
        // nothing was archived, the compressor has no input
        let err = archive.compress(Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, BackupError::Compression { .. }));
    }
}
