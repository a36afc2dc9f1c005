//! Configuration file handling

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::paths::config_path;
use super::{Error, Result};
use crate::provider::strategy::SetupStrategy;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// The packing tool under test
    #[serde(default)]
    pub tool: ToolConfig,

    /// Isolation runtime settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Where the prebuilt artifact comes from
    #[serde(default)]
    pub installer: InstallerConfig,

    /// Host identification
    #[serde(default)]
    pub host: HostConfig,

    /// CI job matrix
    #[serde(default)]
    pub matrix: MatrixConfig,
}

/// Settings for the tool under test
#[derive(Debug, Deserialize)]
pub struct ToolConfig {
    /// Executable name or path
    #[serde(default = "default_program")]
    pub program: String,

    /// Author passed to `init --author`
    #[serde(default = "default_author")]
    pub author: String,

    /// Pass `--verbose` to pack and clean
    #[serde(default = "default_true")]
    pub verbose: bool,

    /// Base version written by the scaffold before host pinning
    #[serde(default = "default_scaffold_version")]
    pub scaffold_version: String,

    /// Suffix of the packed artifact
    #[serde(default = "default_artifact_suffix")]
    pub artifact_suffix: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            author: default_author(),
            verbose: true,
            scaffold_version: default_scaffold_version(),
            artifact_suffix: default_artifact_suffix(),
        }
    }
}

fn default_program() -> String {
    "charmcraft".to_string()
}
fn default_author() -> String {
    "testuser".to_string()
}
fn default_true() -> bool {
    true
}
fn default_scaffold_version() -> String {
    "20.04".to_string()
}
fn default_artifact_suffix() -> String {
    ".charm".to_string()
}

/// When privileged runtime commands are prefixed with `sudo`
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SudoMode {
    /// Use sudo unless already running as root
    #[default]
    Auto,
    Always,
    Never,
}

impl SudoMode {
    /// Whether privileged commands need a sudo prefix
    pub fn enabled(self) -> bool {
        match self {
            SudoMode::Always => true,
            SudoMode::Never => false,
            SudoMode::Auto => !running_as_root(),
        }
    }
}

#[cfg(unix)]
fn running_as_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn running_as_root() -> bool {
    false
}

/// Isolation runtime configuration
#[derive(Debug, Deserialize)]
pub struct ProviderConfig {
    /// Administrative group of the runtime
    #[serde(default = "default_group")]
    pub group: String,

    /// User added to the group; falls back to `$USER`
    #[serde(default)]
    pub user: Option<String>,

    /// Readiness wait timeout in seconds
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,

    /// LXD project holding the tool's build instances
    #[serde(default = "default_lxd_project")]
    pub lxd_project: String,

    /// Name prefix of build instances removed on destroy
    #[serde(default = "default_instance_prefix")]
    pub instance_prefix: String,

    #[serde(default)]
    pub sudo: SudoMode,

    /// Extra or overriding entries for the OS version setup table
    #[serde(default)]
    pub strategies: HashMap<String, SetupStrategy>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            group: default_group(),
            user: None,
            ready_timeout_secs: default_ready_timeout(),
            lxd_project: default_lxd_project(),
            instance_prefix: default_instance_prefix(),
            sudo: SudoMode::default(),
            strategies: HashMap::new(),
        }
    }
}

fn default_group() -> String {
    "lxd".to_string()
}
fn default_ready_timeout() -> u64 {
    30
}
fn default_lxd_project() -> String {
    "charmcraft".to_string()
}
fn default_instance_prefix() -> String {
    "charmcraft-".to_string()
}

/// Artifact installer configuration
#[derive(Debug, Deserialize)]
pub struct InstallerConfig {
    /// Directory the CI download step placed the artifact in
    #[serde(default)]
    pub artifact_dir: Option<PathBuf>,

    /// File name pattern of the artifact inside that directory
    #[serde(default = "default_artifact_pattern")]
    pub pattern: String,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            artifact_dir: None,
            pattern: default_artifact_pattern(),
        }
    }
}

fn default_artifact_pattern() -> String {
    "charmcraft_*.snap".to_string()
}

/// Host identification settings
#[derive(Debug, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_os_release")]
    pub os_release_path: PathBuf,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            os_release_path: default_os_release(),
        }
    }
}

fn default_os_release() -> PathBuf {
    PathBuf::from("/etc/os-release")
}

/// CI matrix definition
#[derive(Debug, Deserialize)]
pub struct MatrixConfig {
    /// Runner images for the unit-test job
    #[serde(default = "default_unit_os")]
    pub unit_os: Vec<String>,

    /// Interpreter versions for the unit-test job
    #[serde(default = "default_interpreters")]
    pub interpreters: Vec<String>,

    /// Runner images for the smoke-test job
    #[serde(default = "default_smoke_os")]
    pub smoke_os: Vec<String>,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            unit_os: default_unit_os(),
            interpreters: default_interpreters(),
            smoke_os: default_smoke_os(),
        }
    }
}

fn default_unit_os() -> Vec<String> {
    ["ubuntu-18.04", "ubuntu-20.04", "macos-10.15", "windows-2019"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_interpreters() -> Vec<String> {
    ["3.6", "3.8", "3.9"].into_iter().map(String::from).collect()
}
fn default_smoke_os() -> Vec<String> {
    ["ubuntu-18.04", "ubuntu-20.04"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Config {
    /// Load configuration
    ///
    /// An explicit path must exist. Without one, the default config file is
    /// used when present and built-in defaults otherwise.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, e))?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Readiness wait timeout
    pub fn ready_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.provider.ready_timeout_secs)
    }
}
