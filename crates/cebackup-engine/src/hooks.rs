//! Hook discovery and execution.
//!
//! A hook is an executable, or a directory of executables. Pre hooks print
//! absolute paths to include in the backup, one per line. Post hooks run after
//! the backup and only report success or failure.

use crate::context::RunContext;
use crate::process::{run_with_timeout, CommandError};
use nix::unistd::{access, AccessFlags};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Default time a single hook may run
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(60);

/// Aggregated result of running a list of hooks.
#[derive(Debug, Clone, Default)]
pub struct HookResults {
    /// False if any hook failed or timed out
    pub all_ok: bool,

    /// Paths printed by successful hooks
    pub paths: Vec<PathBuf>,
}

/// Expand hook specs into the executables to run.
///
/// Directories yield each readable and executable regular file they contain,
/// in name order. Unusable entries are skipped with a warning.
pub fn resolve_hooks(hooks: &[PathBuf]) -> Vec<PathBuf> {
    let mut resolved = Vec::new();
    for hook in hooks {
        if hook.is_file() && is_runnable(hook) {
            resolved.push(hook.clone());
        } else if hook.is_dir() {
            let entries = match fs::read_dir(hook) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Not usable hook directory {}: {}", hook.display(), e);
                    continue;
                }
            };
            let mut found: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| {
                    let usable = path.is_file() && is_runnable(path);
                    if !usable && path.is_file() {
                        warn!("Not usable hook: {}", path.display());
                    }
                    usable
                })
                .collect();
            found.sort();
            resolved.extend(found);
        } else {
            warn!("Not usable hook: {}", hook.display());
        }
    }
    resolved
}

/// Readable and executable by this process, as decided by access(2).
fn is_runnable(path: &Path) -> bool {
    access(path, AccessFlags::R_OK | AccessFlags::X_OK).is_ok()
}

/// Run a single hook and return the lines it printed.
pub async fn run_hook(
    hook: &Path,
    ctx: &RunContext,
    timeout: Duration,
) -> Result<Vec<String>, CommandError> {
    let mut cmd = Command::new(hook);
    cmd.envs(ctx.env());
    if ctx.tmpdir().is_dir() {
        cmd.current_dir(ctx.tmpdir());
    }

    let output = run_with_timeout(cmd, timeout).await?;
    debug!("{} stdout: {}, stderr: {}", hook.display(), output.stdout, output.stderr);

    Ok(output
        .stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}

/// Run every hook in order and collect the absolute paths they print.
///
/// A failing hook contributes no paths and clears `all_ok`; the remaining
/// hooks still run.
pub async fn call_hooks(hooks: &[PathBuf], ctx: &RunContext, timeout: Duration) -> HookResults {
    let mut results = HookResults {
        all_ok: true,
        paths: Vec::new(),
    };

    for hook in resolve_hooks(hooks) {
        info!("Run hook {}", hook.display());
        match run_hook(&hook, ctx, timeout).await {
            Ok(lines) => {
                for line in lines {
                    let path = PathBuf::from(&line);
                    if path.is_absolute() {
                        results.paths.push(path);
                    } else {
                        warn!("Hook {} printed a relative path, ignored: {}", hook.display(), line);
                    }
                }
            }
            Err(CommandError::Failed { status, stderr, stdout, .. }) => {
                error!(
                    "Failed to run hook {}, exit code: {}, stderr: {}",
                    hook.display(),
                    status,
                    stderr.trim()
                );
                debug!("{} stdout: {}", hook.display(), stdout);
                results.all_ok = false;
            }
            Err(e) => {
                error!("Failed to run hook {}: {}", hook.display(), e);
                results.all_ok = false;
            }
        }
    }

    results.paths.sort();
    results.paths.dedup();
    debug!("Got {} paths from hooks", results.paths.len());
    results
}
