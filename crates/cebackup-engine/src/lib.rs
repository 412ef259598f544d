//! cebackup archive engine
//!
//! This crate implements the life cycle of a local, encrypted backup:
//! collecting paths from glob sources and pre hooks, building a tar archive
//! one path at a time under a global deadline, deduplicating archives by the
//! SHA256 of their uncompressed content, compressing and encrypting new
//! archives, and pruning old ones under a retention policy.
//!
//! # Features
//!
//! - **Whole-archive deduplication**: identical content is stored once; a
//!   repeated run only refreshes the ledger's `touched` time
//! - **Deadline-bounded archiving**: the deadline is checked between paths
//! - **Month-preserving retention**: the newest archive of each calendar
//!   month is never pruned
//! - **Hook protocol**: run-scoped context passed to hook processes through
//!   their environment
//!
//! # Examples
//!
//! ```no_run
//! use cebackup_engine::{make_backup, BackupRequest, GpgEncryptor, RunContext};
//! use cebackup_core::CebackupConfig;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CebackupConfig::load("/home/me/.config/cebackup.yaml".as_ref())?;
//!     let context = RunContext::new(&config.hook_tmpdir);
//!     let encryptor = GpgEncryptor::new(config.local.recipient.clone(), Duration::from_secs(600));
//!
//!     let request = BackupRequest {
//!         config: &config.local,
//!         sources: &config.sources,
//!         pre_hooks: &config.pre_hooks,
//!         context: &context,
//!         hook_timeout: Duration::from_secs(60),
//!     };
//!     let outcome = make_backup(&request, &encryptor).await?;
//!     println!("ok: {}, new archive: {}", outcome.ok, outcome.created);
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod checksum;
pub mod context;
pub mod encrypt;
pub mod error;
pub mod hooks;
pub mod ledger;
pub mod pipeline;
pub mod process;
pub mod retention;
pub mod sources;

// Re-export commonly used types
pub use archive::{archive_month, archive_timestamp, AppendOutcome, Archive, ArchiveName};
pub use checksum::calculate_checksum;
pub use context::{RunContext, RunReport, SOURCES_FILENAME};
pub use encrypt::{encrypt_archive, Encryptor, GpgEncryptor};
pub use error::{BackupError, Result};
pub use hooks::{call_hooks, resolve_hooks, HookResults, DEFAULT_HOOK_TIMEOUT};
pub use ledger::{Ledger, LedgerEntry, NewArchive, LEDGER_FILENAME};
pub use pipeline::{make_backup, make_backup_as, BackupOutcome, BackupRequest};
pub use process::{run_with_timeout, CommandError, CommandOutput};
pub use retention::{days_to_secs, list_encrypted_archives, prune, prune_at, PruneReport};
pub use sources::{collect_sources, merge_paths};

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
