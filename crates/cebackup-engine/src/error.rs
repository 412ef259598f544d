//! Error types for cebackup-engine

use crate::process::CommandError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using cebackup-engine's error type
pub type Result<T> = std::result::Result<T, BackupError>;

/// Fatal errors of a backup or prune run.
///
/// Recoverable conditions (a single path that tar could not add, a failing
/// hook, a stale ledger entry) are not errors; they are recorded on the run
/// outcome instead.
#[derive(Error, Debug)]
pub enum BackupError {
    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] cebackup_core::Error),

    /// Source entry that cannot be expanded
    #[error("Invalid source specification '{pattern}': {message}")]
    InvalidSource { pattern: String, message: String },

    /// Filename that does not follow the archive naming scheme
    #[error("Invalid archive name: {}", path.display())]
    InvalidArchiveName { path: PathBuf },

    /// No path could be archived
    #[error("Nothing was archived into {}", path.display())]
    EmptyArchive { path: PathBuf },

    /// Compressing the tar archive failed
    #[error("Failed to compress archive {}: {source}", path.display())]
    Compression {
        path: PathBuf,
        #[source]
        source: CommandError,
    },

    /// Encrypting the compressed archive failed
    #[error("Failed to encrypt archive {}: {message}", path.display())]
    Encryption { path: PathBuf, message: String },

    /// Ledger could not be parsed or written
    #[error("Ledger error in {}: {message}", path.display())]
    Ledger { path: PathBuf, message: String },

    /// Hook scratch directory problem
    #[error("Hook directory {}: {source}", path.display())]
    HookDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackupError {
    /// Create an invalid source error
    pub fn invalid_source(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSource {
            pattern: pattern.into(),
            message: message.into(),
        }
    }

    /// Create a ledger error
    pub fn ledger(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Self::Ledger {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error stems from the configuration rather than the run.
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_) | Self::InvalidSource { .. })
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        if self.is_config_error() {
            cebackup_core::CONFIG_ERROR_EXIT_CODE
        } else {
            1
        }
    }
}
