//! Asymmetric encryption of compressed archives.

use crate::error::{BackupError, Result};
use crate::process::{describe, run_with_timeout, CommandError};
use async_trait::async_trait;
use cebackup_core::Recipient;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Encrypts a file to a recipient.
#[async_trait]
pub trait Encryptor: Send + Sync {
    /// Write the encrypted form of `input` to `output`.
    async fn encrypt(&self, input: &Path, output: &Path) -> Result<()>;
}

/// Encryption through the `gpg` command line tool.
#[derive(Debug, Clone)]
pub struct GpgEncryptor {
    recipient: Recipient,
    timeout: Duration,
}

impl GpgEncryptor {
    pub fn new(recipient: Recipient, timeout: Duration) -> Self {
        Self { recipient, timeout }
    }

    fn command(&self, input: &Path, output: &Path) -> Command {
        let mut cmd = Command::new("gpg");
        cmd.args(["--batch", "--yes", "--encrypt"]);
        match &self.recipient {
            Recipient::KeyFile(path) => {
                cmd.arg("--recipient-file");
                cmd.arg(path);
            }
            Recipient::KeyId(id) => {
                cmd.arg("--recipient");
                cmd.arg(id);
            }
        }
        cmd.arg("--verbose");
        cmd.arg("--output");
        cmd.arg(output);
        cmd.arg(input);
        cmd
    }
}

#[async_trait]
impl Encryptor for GpgEncryptor {
    async fn encrypt(&self, input: &Path, output: &Path) -> Result<()> {
        let cmd = self.command(input, output);
        debug!("Encrypt archive {}", input.display());
        match run_with_timeout(cmd, self.timeout).await {
            Ok(out) => {
                debug!("gpg stderr: {}", out.stderr.trim_end());
                Ok(())
            }
            Err(CommandError::Failed { status, stdout, stderr, .. }) => {
                error!("gpg stdout: {}", stdout.trim_end());
                error!("gpg stderr: {}", stderr.trim_end());
                Err(BackupError::Encryption {
                    path: input.to_path_buf(),
                    message: format!("gpg exited with {}", status),
                })
            }
            Err(e) => Err(BackupError::Encryption {
                path: input.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }
}

/// Encrypt `compressed` into `encrypted`, then delete `compressed`.
///
/// On failure any partial `encrypted` file is removed and `compressed` is
/// left in place.
pub async fn encrypt_archive(
    encryptor: &dyn Encryptor,
    compressed: &Path,
    encrypted: &Path,
) -> Result<()> {
    if let Err(e) = encryptor.encrypt(compressed, encrypted).await {
        if encrypted.exists() {
            if let Err(rm) = std::fs::remove_file(encrypted) {
                warn!("Failed to remove partial {}: {}", encrypted.display(), rm);
            }
        }
        error!("Encryption failed, keeping {} for inspection", compressed.display());
        return Err(e);
    }

    if !encrypted.is_file() {
        return Err(BackupError::Encryption {
            path: compressed.to_path_buf(),
            message: format!("{} was not written", encrypted.display()),
        });
    }

    std::fs::remove_file(compressed)?;
    info!("Created backup {}", encrypted.display());
    Ok(())
}
