//! Expansion of configured sources into the list of paths to archive.

use crate::error::{BackupError, Result};
use cebackup_core::{normalize_path, SourceSpec};
use glob::MatchOptions;
use std::path::PathBuf;
use tracing::{debug, warn};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

/// Expand every source pattern and return the matches, sorted and
/// deduplicated.
///
/// With `skip_dirs` the pattern is expanded non-recursively (`**` behaves
/// like `*`) and matched directories are dropped.
pub fn collect_sources(sources: &[SourceSpec]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for source in sources {
        paths.extend(expand_source(source)?);
    }
    Ok(merge_paths(paths, Vec::new()))
}

fn expand_source(source: &SourceSpec) -> Result<Vec<PathBuf>> {
    if source.path.is_empty() {
        return Err(BackupError::invalid_source(&source.path, "empty path"));
    }

    // a single trailing slash stays: it restricts matches to directories
    let mut pattern = source.path.clone();
    while pattern.ends_with("//") {
        pattern.pop();
    }
    if source.skip_dirs {
        while pattern.contains("**") {
            pattern = pattern.replace("**", "*");
        }
    }

    let entries = glob::glob_with(&pattern, MATCH_OPTIONS)
        .map_err(|e| BackupError::invalid_source(&source.path, e.to_string()))?;

    let mut matched = Vec::new();
    for entry in entries {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                warn!("Skip unreadable match for {}: {}", source.path, e);
                continue;
            }
        };
        if source.skip_dirs && path.is_dir() {
            debug!("Skip directory {}", path.display());
            continue;
        }
        debug!("Add: {}", path.display());
        matched.push(normalize_path(&path));
    }

    if matched.is_empty() {
        debug!("No matches for {}", source.path);
    }
    Ok(matched)
}

/// Union two path lists; the result is sorted bytewise and free of
/// duplicates.
pub fn merge_paths(mut paths: Vec<PathBuf>, extra: Vec<PathBuf>) -> Vec<PathBuf> {
    paths.extend(extra);
    paths.sort_by(|a, b| a.as_os_str().cmp(b.as_os_str()));
    paths.dedup();
    paths
}
