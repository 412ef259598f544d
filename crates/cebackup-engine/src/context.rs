//! Run-scoped context passed to hook processes.
//!
//! Hooks learn about the running backup only through the environment built
//! here; the parent process environment is never modified.

use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Set to `1` for every hook started by a backup run
pub const ENV_ACTIVE: &str = "CEBACKUP";
/// Unique identifier of the run
pub const ENV_RUN_ID: &str = "CEBACKUP_RUN_ID";
/// Scratch directory shared with hooks
pub const ENV_TMPDIR: &str = "CEBACKUP_TMPDIR";
/// `1` if the run succeeded (post hooks)
pub const ENV_OK: &str = "CEBACKUP_OK";
/// `1` if a new encrypted archive was written (post hooks)
pub const ENV_BACKUP_CREATED: &str = "CEBACKUP_BACKUP_CREATED";
/// Encrypted archive holding this run's content (post hooks)
pub const ENV_BACKUP_PATH: &str = "CEBACKUP_BACKUP_PATH";
/// File listing every collected path (post hooks)
pub const ENV_SOURCES: &str = "CEBACKUP_SOURCES";
/// Log file of the run, if any (post hooks)
pub const ENV_LOGFILE: &str = "CEBACKUP_LOGFILE";

/// Name of the collected path list inside the scratch directory.
pub const SOURCES_FILENAME: &str = "backup_sources";

/// Result of a run as reported to post hooks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub ok: bool,
    pub created: bool,
    pub backup_path: Option<PathBuf>,
    pub sources_file: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
}

/// Context of one backup run.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: Uuid,
    tmpdir: PathBuf,
    report: Option<RunReport>,
}

impl RunContext {
    /// Create a context for a new run using `tmpdir` as hook scratch space.
    pub fn new(tmpdir: impl Into<PathBuf>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            tmpdir: tmpdir.into(),
            report: None,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn tmpdir(&self) -> &Path {
        &self.tmpdir
    }

    /// Attach the run result; subsequent hook invocations see it.
    pub fn with_report(mut self, report: RunReport) -> Self {
        self.report = Some(report);
        self
    }

    /// Environment variables to inject into a hook process.
    pub fn env(&self) -> Vec<(&'static str, String)> {
        let mut vars = vec![
            (ENV_ACTIVE, "1".to_string()),
            (ENV_RUN_ID, self.run_id.to_string()),
            (ENV_TMPDIR, self.tmpdir.display().to_string()),
        ];

        if let Some(report) = &self.report {
            let path_or_empty = |p: &Option<PathBuf>| {
                p.as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default()
            };
            vars.push((ENV_OK, flag(report.ok)));
            vars.push((ENV_BACKUP_CREATED, flag(report.created)));
            vars.push((ENV_BACKUP_PATH, path_or_empty(&report.backup_path)));
            vars.push((ENV_SOURCES, path_or_empty(&report.sources_file)));
            vars.push((ENV_LOGFILE, path_or_empty(&report.log_file)));
        }

        vars
    }
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}
