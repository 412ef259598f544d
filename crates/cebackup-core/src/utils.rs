//! Shared path helpers for cebackup crates

use std::path::{Component, Path, PathBuf};

/// Get the user's home directory
///
/// Prefers the HOME environment variable over dirs::home_dir() so that
/// scheduled runs and tests can point cebackup at another home.
pub fn get_home_dir() -> Option<PathBuf> {
    if let Some(home) = std::env::var_os("HOME").filter(|h| !h.is_empty()) {
        return Some(PathBuf::from(home));
    }
    dirs::home_dir()
}

/// Expand a leading `~` or `~/` to the home directory.
///
/// `~user` forms are returned unchanged.
pub fn expand_tilde(raw: &str) -> String {
    if raw == "~" || raw.starts_with("~/") {
        if let Some(home) = get_home_dir() {
            let home = home.to_string_lossy();
            let home = home.trim_end_matches('/');
            return format!("{}{}", home, &raw[1..]);
        }
    }
    raw.to_string()
}

/// Lexically normalize a path: collapse `.` and `..`, drop trailing and
/// repeated separators. Symlinks are not resolved.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = match out.components().next_back() {
                    Some(Component::Normal(_)) => out.pop(),
                    Some(Component::RootDir) | Some(Component::Prefix(_)) => true,
                    _ => false,
                };
                if !popped {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Expand `~` and make `raw` absolute relative to `base`.
pub fn resolve_path(base: &Path, raw: &str) -> PathBuf {
    let expanded = PathBuf::from(expand_tilde(raw));
    if expanded.is_absolute() {
        normalize_path(&expanded)
    } else {
        normalize_path(&base.join(expanded))
    }
}
