//! # cebackup-core
//!
//! Core library for cebackup providing:
//! - Configuration file parsing (cebackup.yaml)
//! - Path resolution relative to the configuration file
//! - Type definitions for sources, compression, recipients and retention

pub mod config;
pub mod error;
pub mod types;
pub mod utils;

pub use config::{CebackupConfig, DEFAULT_CONFIG_FILE};
pub use error::{Error, Result, CONFIG_ERROR_EXIT_CODE};
pub use types::{Compression, LocalBackupConfig, Recipient, RetentionPolicy, SourceSpec};
pub use utils::{expand_tilde, get_home_dir, normalize_path};
