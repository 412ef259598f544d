//! Type definitions for cebackup configuration

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Raw `cebackup.yaml` document, before path resolution.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CebackupConfigFile {
    /// Glob patterns to include
    #[serde(default)]
    pub backup_sources: Vec<RawSourceSpec>,

    /// Hooks producing extra paths before archiving
    #[serde(default)]
    pub pre_hooks: Option<Vec<String>>,

    /// Hooks run after the backup finished
    #[serde(default)]
    pub post_hooks: Option<Vec<String>>,

    /// Scratch directory shared with hooks
    #[serde(default)]
    pub hook_tmpdir: Option<String>,

    /// Append logs to this file instead of stdout
    #[serde(default)]
    pub log_file: Option<String>,

    /// Log level (error, warning, info, debug)
    #[serde(default)]
    pub log_level: Option<String>,

    /// Local archive settings
    #[serde(default)]
    pub local_backup: Option<LocalBackupFile>,
}

/// A source entry as written in the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSourceSpec {
    /// Glob pattern; required
    #[serde(default)]
    pub path: Option<String>,

    /// Drop directories matched by the pattern
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub skip_dirs: bool,
}

/// `local_backup` section as written in the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocalBackupFile {
    #[serde(default)]
    pub directory: Option<String>,

    #[serde(default)]
    pub gpg_public_key: Option<String>,

    #[serde(default)]
    pub archive_prefix: Option<String>,

    #[serde(default)]
    pub compression: Option<String>,

    #[serde(default)]
    pub ignore_file: Option<String>,

    #[serde(default)]
    pub timeout: Option<u64>,

    #[serde(default)]
    pub prune: Option<RawRetentionPolicy>,
}

/// `prune` block as written in the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRetentionPolicy {
    #[serde(default)]
    pub keep_archives: Option<usize>,

    #[serde(default)]
    pub keep_days: Option<u64>,
}

/// A resolved backup source: an absolute glob pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Absolute glob pattern
    pub path: String,

    /// Drop directories matched by the pattern
    #[serde(default)]
    pub skip_dirs: bool,
}

impl SourceSpec {
    pub fn new(path: impl Into<String>, skip_dirs: bool) -> Self {
        Self {
            path: path.into(),
            skip_dirs,
        }
    }
}

/// Compression applied to the tar archive before encryption.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Gzip,
    Bzip2,
    Xz,
}

impl Compression {
    /// External program that compresses a file in place.
    pub fn program(&self) -> &'static str {
        match self {
            Compression::Gzip => "gzip",
            Compression::Bzip2 => "bzip2",
            Compression::Xz => "xz",
        }
    }

    /// Suffix the program appends to the compressed file.
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::Gzip => "gz",
            Compression::Bzip2 => "bz2",
            Compression::Xz => "xz",
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.program())
    }
}

impl FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gzip" | "gz" => Ok(Compression::Gzip),
            "bzip2" | "bz2" => Ok(Compression::Bzip2),
            "xz" => Ok(Compression::Xz),
            _ => Err(Error::invalid_compression(s)),
        }
    }
}

/// Encryption recipient: a key identifier known to the keyring, or a public
/// key file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Recipient {
    KeyId(String),
    KeyFile(PathBuf),
}

impl std::fmt::Display for Recipient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Recipient::KeyId(id) => write!(f, "{}", id),
            Recipient::KeyFile(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Retention policy for encrypted archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Number of newest archives never considered for deletion
    pub keep_archives: usize,

    /// Minimum age, by last-touched time, before an archive may be deleted
    pub keep_days: u64,
}

impl RetentionPolicy {
    pub fn new(keep_archives: usize, keep_days: u64) -> Self {
        Self {
            keep_archives,
            keep_days,
        }
    }
}

/// Resolved `local_backup` section.
#[derive(Debug, Clone)]
pub struct LocalBackupConfig {
    /// Directory holding encrypted archives and the ledger
    pub directory: PathBuf,

    /// Encryption recipient
    pub recipient: Recipient,

    /// Archive filename prefix
    pub archive_prefix: String,

    /// Compression method
    pub compression: Compression,

    /// Per-directory ignore file honored by tar
    pub ignore_file: String,

    /// Global archiving budget in seconds
    pub timeout: u64,

    /// Retention policy; pruning is disabled when absent
    pub prune: Option<RetentionPolicy>,
}

/// Accept YAML 1.1 style booleans (`yes`, `no`, `on`, `off`) alongside
/// `true`/`false`.
fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Option::<Flag>::deserialize(deserializer)? {
        None => Ok(false),
        Some(Flag::Bool(b)) => Ok(b),
        Some(Flag::Text(s)) => match s.to_ascii_lowercase().as_str() {
            "yes" | "y" | "on" | "true" => Ok(true),
            "no" | "n" | "off" | "false" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected a boolean, got '{}'",
                other
            ))),
        },
    }
}
