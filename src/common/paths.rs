//! Configuration and log locations
//!
//! Uses the directories crate for platform-appropriate locations:
//! - Linux: `~/.config/charm-smoke/` and `~/.local/share/charm-smoke/`
//! - macOS: `~/Library/Application Support/charm-smoke/`

use std::path::{Component, Path, PathBuf};

const APP_NAME: &str = "charm-smoke";

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.data_dir().join("logs"))
}

/// Default location of the persistent job log
pub fn default_log_file() -> Option<PathBuf> {
    log_dir().map(|d| d.join("job.log"))
}

/// Whether a path stays below the directory it is joined onto
///
/// Scenario workspaces are deleted recursively, so they must be relative,
/// must not climb out with `..` and must name at least one directory below
/// the base (`.` alone would be the base itself).
pub fn is_contained(path: &Path) -> bool {
    let mut named = false;
    for component in path.components() {
        match component {
            Component::Normal(_) => named = true,
            Component::CurDir => {}
            _ => return false,
        }
    }
    named
}
