//! Configuration file loading and path resolution

use crate::error::{Error, Result};
use crate::types::{
    CebackupConfigFile, Compression, LocalBackupConfig, RawRetentionPolicy, Recipient,
    RetentionPolicy, SourceSpec,
};
use crate::utils::{expand_tilde, resolve_path};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::path::{Path, PathBuf};

/// Default configuration file location
pub const DEFAULT_CONFIG_FILE: &str = "~/.config/cebackup.yaml";

/// Default hook scratch directory
pub const DEFAULT_HOOK_TMPDIR: &str = "~/cebackup-auxdata";

/// Default archive filename prefix
pub const DEFAULT_ARCHIVE_PREFIX: &str = "backup";

/// Default per-directory ignore file
pub const DEFAULT_IGNORE_FILE: &str = ".cebackup";

/// Default global archiving budget in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Loaded configuration with every path resolved to an absolute path.
#[derive(Debug, Clone)]
pub struct CebackupConfig {
    /// Sources to archive; the config file itself is always the last entry
    pub sources: Vec<SourceSpec>,

    /// Hooks producing extra paths
    pub pre_hooks: Vec<PathBuf>,

    /// Hooks run after the backup
    pub post_hooks: Vec<PathBuf>,

    /// Scratch directory shared with hooks
    pub hook_tmpdir: PathBuf,

    /// Log file, if configured
    pub log_file: Option<PathBuf>,

    /// Log level, if configured
    pub log_level: Option<String>,

    /// Archive settings
    pub local: LocalBackupConfig,

    /// Path to the configuration file
    pub config_path: Utf8PathBuf,
}

impl CebackupConfig {
    /// Load configuration from `path`.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let expanded = Utf8PathBuf::from(expand_tilde(path.as_str()));
        let content = fs::read_to_string(&expanded).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::config_not_found(expanded.as_str())
            } else {
                Error::Io(e)
            }
        })?;

        let config_path = if expanded.is_absolute() {
            expanded
        } else {
            let cwd = std::env::current_dir()?;
            Utf8PathBuf::from_path_buf(cwd.join(&expanded))
                .map_err(|p| Error::invalid_config(format!("non UTF-8 path: {}", p.display())))?
        };

        Self::from_yaml(&content, &config_path)
    }

    /// Parse and resolve a configuration document located at `config_path`.
    pub fn from_yaml(content: &str, config_path: &Utf8Path) -> Result<Self> {
        let file: CebackupConfigFile = if content.trim().is_empty() {
            CebackupConfigFile::default()
        } else {
            serde_yaml_ng::from_str(content)?
        };
        let base = config_path
            .parent()
            .map(|p| p.as_std_path().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let mut config = Self::resolve(file, &base, config_path)?;
        config
            .sources
            .push(SourceSpec::new(config_path.as_str(), false));
        Ok(config)
    }

    fn resolve(file: CebackupConfigFile, base: &Path, config_path: &Utf8Path) -> Result<Self> {
        let mut sources = Vec::with_capacity(file.backup_sources.len() + 1);
        for (index, raw) in file.backup_sources.into_iter().enumerate() {
            let path = raw
                .path
                .ok_or_else(|| Error::missing_field(format!("backup_sources[{}].path", index)))?;
            let resolved = resolve_path(base, &path);
            sources.push(SourceSpec::new(
                resolved.to_string_lossy().into_owned(),
                raw.skip_dirs,
            ));
        }

        let resolve_all = |hooks: Option<Vec<String>>| -> Vec<PathBuf> {
            hooks
                .unwrap_or_default()
                .iter()
                .map(|h| resolve_path(base, h))
                .collect()
        };
        let pre_hooks = resolve_all(file.pre_hooks);
        let post_hooks = resolve_all(file.post_hooks);

        let hook_tmpdir = resolve_path(
            base,
            file.hook_tmpdir.as_deref().unwrap_or(DEFAULT_HOOK_TMPDIR),
        );
        let log_file = file.log_file.as_deref().map(|p| resolve_path(base, p));

        let local = file
            .local_backup
            .ok_or_else(|| Error::missing_field("local_backup"))?;

        let directory = local
            .directory
            .as_deref()
            .map(|d| resolve_path(base, d))
            .ok_or_else(|| Error::missing_field("local_backup.directory"))?;

        let key = local
            .gpg_public_key
            .ok_or_else(|| Error::missing_field("local_backup.gpg_public_key"))?;
        let recipient = resolve_recipient(base, &key)?;

        let compression = match local.compression.as_deref() {
            Some(name) => name.parse::<Compression>()?,
            None => Compression::default(),
        };

        let archive_prefix = local
            .archive_prefix
            .unwrap_or_else(|| DEFAULT_ARCHIVE_PREFIX.to_string());
        if archive_prefix.contains('/') {
            return Err(Error::invalid_config(format!(
                "archive_prefix must not contain '/': {}",
                archive_prefix
            )));
        }

        let timeout = local.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout == 0 {
            return Err(Error::invalid_config(
                "local_backup.timeout must be greater than 0",
            ));
        }

        let prune = local.prune.map(validate_retention).transpose()?;

        tracing::debug!(
            "Loaded {} sources, {} pre hooks, {} post hooks from {}",
            sources.len(),
            pre_hooks.len(),
            post_hooks.len(),
            config_path
        );

        Ok(Self {
            sources,
            pre_hooks,
            post_hooks,
            hook_tmpdir,
            log_file,
            log_level: file.log_level,
            local: LocalBackupConfig {
                directory,
                recipient,
                archive_prefix,
                compression,
                ignore_file: local
                    .ignore_file
                    .unwrap_or_else(|| DEFAULT_IGNORE_FILE.to_string()),
                timeout,
                prune,
            },
            config_path: config_path.to_owned(),
        })
    }
}

/// A key spec naming an existing file selects file mode; anything else is a
/// key identifier.
fn resolve_recipient(base: &Path, key: &str) -> Result<Recipient> {
    let key = key.trim();
    if key.is_empty() {
        return Err(Error::invalid_config("gpg_public_key is empty"));
    }
    let candidate = resolve_path(base, key);
    if candidate.is_file() {
        Ok(Recipient::KeyFile(candidate))
    } else {
        Ok(Recipient::KeyId(key.to_string()))
    }
}

fn validate_retention(raw: RawRetentionPolicy) -> Result<RetentionPolicy> {
    match (raw.keep_archives, raw.keep_days) {
        (Some(archives), Some(days)) if archives > 0 && days > 0 => {
            Ok(RetentionPolicy::new(archives, days))
        }
        _ => Err(Error::invalid_config(
            "prune requires non-zero keep_archives and keep_days",
        )),
    }
}

#[cfg(test)]
mod tests {
    use crate::CONFIG_ERROR_EXIT_CODE;
    use super::*;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"---
backup_sources:
  - path: /etc/*
    skip_dirs: yes
  - path: foo
local_backup:
  directory: backup_dir
  gpg_public_key: user@example.com
"#;

    fn config_path(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join("cebackup.yaml")).unwrap()
    }

    #[test]
    fn test_minimal_config_gets_defaults() {
        let dir = TempDir::new().unwrap();
        let path = config_path(&dir);
        let config = CebackupConfig::from_yaml(MINIMAL, &path).unwrap();

        assert_eq!(
            config.sources,
            vec![
                SourceSpec::new("/etc/*", true),
                SourceSpec::new(dir.path().join("foo").to_string_lossy(), false),
                SourceSpec::new(path.as_str(), false),
            ]
        );
        assert_eq!(config.local.directory, dir.path().join("backup_dir"));
        assert_eq!(
            config.local.recipient,
            Recipient::KeyId("user@example.com".to_string())
        );
        assert_eq!(config.local.archive_prefix, DEFAULT_ARCHIVE_PREFIX);
        assert_eq!(config.local.ignore_file, DEFAULT_IGNORE_FILE);
        assert_eq!(config.local.compression, Compression::Gzip);
        assert_eq!(config.local.timeout, DEFAULT_TIMEOUT_SECS);
        assert!(config.local.prune.is_none());
        assert!(config.pre_hooks.is_empty());
        assert!(config.post_hooks.is_empty());
    }

    #[test]
    fn test_key_file_recipient() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("pub.asc"), "key").unwrap();
        let yaml = "local_backup:\n  directory: /srv/backup\n  gpg_public_key: pub.asc\n";
        let config = CebackupConfig::from_yaml(yaml, &config_path(&dir)).unwrap();
        assert_eq!(
            config.local.recipient,
            Recipient::KeyFile(dir.path().join("pub.asc"))
        );
    }

    #[test]
    fn test_hooks_and_prune_resolved() {
        let dir = TempDir::new().unwrap();
        let yaml = r#"
pre_hooks:
  - hooks/pre
  - /usr/local/bin/dump-db
post_hooks:
hook_tmpdir: scratch
local_backup:
  directory: /srv/backup
  gpg_public_key: ABCDEF0123456789
  archive_prefix: laptop
  compression: xz
  timeout: 600
  prune:
    keep_archives: 3
    keep_days: 30
"#;
        let config = CebackupConfig::from_yaml(yaml, &config_path(&dir)).unwrap();
        assert_eq!(
            config.pre_hooks,
            vec![
                dir.path().join("hooks/pre"),
                PathBuf::from("/usr/local/bin/dump-db")
            ]
        );
        assert!(config.post_hooks.is_empty());
        assert_eq!(config.hook_tmpdir, dir.path().join("scratch"));
        assert_eq!(config.local.archive_prefix, "laptop");
        assert_eq!(config.local.compression, Compression::Xz);
        assert_eq!(config.local.timeout, 600);
        assert_eq!(config.local.prune, Some(RetentionPolicy::new(3, 30)));
    }

    #[test]
    fn test_source_without_path_is_config_error() {
        let dir = TempDir::new().unwrap();
        let yaml = "backup_sources:\n  - skip_dirs: true\n\
                    local_backup:\n  directory: /b\n  gpg_public_key: k\n";
        let err = CebackupConfig::from_yaml(yaml, &config_path(&dir)).unwrap_err();
        assert!(matches!(err, Error::MissingField { .. }));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_missing_local_backup_is_config_error() {
        let dir = TempDir::new().unwrap();
        let err =
            CebackupConfig::from_yaml("backup_sources: []\n", &config_path(&dir)).unwrap_err();
        assert!(matches!(err, Error::MissingField { ref field } if field == "local_backup"));
    }

    #[test]
    fn test_invalid_compression_and_prune() {
        let dir = TempDir::new().unwrap();
        let yaml = "local_backup:\n  directory: /b\n  gpg_public_key: k\n  compression: lz4\n";
        assert!(matches!(
            CebackupConfig::from_yaml(yaml, &config_path(&dir)),
            Err(Error::InvalidCompression { .. })
        ));

        let yaml = "local_backup:\n  directory: /b\n  gpg_public_key: k\n\
                    \x20 prune:\n    keep_archives: 0\n    keep_days: 10\n";
        assert!(matches!(
            CebackupConfig::from_yaml(yaml, &config_path(&dir)),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_zero_timeout_is_config_error() {
        let dir = TempDir::new().unwrap();
        let yaml = "local_backup:\n  directory: /b\n  gpg_public_key: k\n  timeout: 0\n";
        let err = CebackupConfig::from_yaml(yaml, &config_path(&dir)).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
        assert_eq!(err.exit_code(), CONFIG_ERROR_EXIT_CODE);

        let yaml = "local_backup:\n  directory: /b\n  gpg_public_key: k\n  timeout: 1\n";
        let config = CebackupConfig::from_yaml(yaml, &config_path(&dir)).unwrap();
        assert_eq!(config.local.timeout, 1);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = CebackupConfig::load(&config_path(&dir)).unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound { .. }));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = TempDir::new().unwrap();
        let path = config_path(&dir);
        std::fs::write(&path, MINIMAL).unwrap();
        let config = CebackupConfig::load(&path).unwrap();
        assert_eq!(config.config_path, path);
        assert_eq!(config.sources.len(), 3);
    }
}
