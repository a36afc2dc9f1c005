//! Smoke scenarios
//!
//! A scenario describes one `init`, `pack`, `clean` run of the tool: where
//! the project is scaffolded, where pack is invoked from, whether the build
//! goes through the isolation runtime and which artifact must come out.
//! The three built-in scenarios are values of the same type as scenarios
//! loaded from a file.

pub mod config;
pub mod driver;
pub mod verifier;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::host::HostProfile;

/// Built-in scenarios
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioKind {
    /// Pack the project in the current directory
    DefaultDirectory,
    /// Pack a project in a subdirectory via `--project-dir`
    ExternalProjectDirectory,
    /// Pack directly on the host, bypassing the runtime
    DestructiveMode,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; 3] = [
        ScenarioKind::DefaultDirectory,
        ScenarioKind::ExternalProjectDirectory,
        ScenarioKind::DestructiveMode,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ScenarioKind::DefaultDirectory => "default-directory",
            ScenarioKind::ExternalProjectDirectory => "external-project-directory",
            ScenarioKind::DestructiveMode => "destructive-mode",
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the tool's build happens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    /// Inside the isolation runtime, under the runtime group
    #[default]
    Sandboxed,
    /// Directly on the host
    Direct,
}

/// Which directory `pack` is pointed at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectReference {
    /// The invocation directory is the project
    SelfDir,
    /// A project below the invocation directory, passed as `--project-dir`
    External(PathBuf),
}

/// Expected artifact file name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactPattern {
    /// Any file ending in this suffix
    Suffix(String),
    /// An exact name; `{os_version}` and `{arch}` come from the host
    Exact(String),
}

impl ArtifactPattern {
    /// Glob matched against file names in the invocation directory
    pub fn render(&self, profile: &HostProfile) -> String {
        match self {
            ArtifactPattern::Suffix(suffix) => format!("*{}", glob::Pattern::escape(suffix)),
            ArtifactPattern::Exact(template) => glob::Pattern::escape(
                &template
                    .replace("{os_version}", &profile.os_version)
                    .replace("{arch}", &profile.arch),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    pub name: String,
    /// Invocation directory, relative to the job's workspace root
    pub workspace: PathBuf,
    pub project: ProjectReference,
    pub isolation: IsolationMode,
    pub artifact: ArtifactPattern,
    /// Rewrite the scaffold's base version to the host's before packing
    pub pin_host_version: bool,
}

impl Scenario {
    /// One of the built-in scenarios; `suffix` is the tool's artifact suffix
    pub fn builtin(kind: ScenarioKind, suffix: &str) -> Self {
        match kind {
            ScenarioKind::DefaultDirectory => Self {
                name: kind.as_str().to_string(),
                workspace: PathBuf::from("charm-smoke-test"),
                project: ProjectReference::SelfDir,
                isolation: IsolationMode::Sandboxed,
                artifact: ArtifactPattern::Suffix(suffix.to_string()),
                pin_host_version: false,
            },
            ScenarioKind::ExternalProjectDirectory => Self {
                name: kind.as_str().to_string(),
                workspace: PathBuf::from("another-directory"),
                project: ProjectReference::External(PathBuf::from("charm-smoke-test")),
                isolation: IsolationMode::Sandboxed,
                artifact: ArtifactPattern::Suffix(suffix.to_string()),
                pin_host_version: false,
            },
            ScenarioKind::DestructiveMode => Self {
                name: kind.as_str().to_string(),
                workspace: PathBuf::from("destructive-mode-tests"),
                project: ProjectReference::SelfDir,
                isolation: IsolationMode::Direct,
                artifact: ArtifactPattern::Exact(
                    "destructive-mode-tests_ubuntu-{os_version}-{arch}.charm".to_string(),
                ),
                pin_host_version: true,
            },
        }
    }

    /// Built-in scenarios for the given kinds, in order
    pub fn builtins(kinds: &[ScenarioKind], suffix: &str) -> Vec<Self> {
        kinds.iter().map(|k| Self::builtin(*k, suffix)).collect()
    }

    /// Absolute invocation directory under `root`
    pub fn workspace_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.workspace)
    }

    /// Project directory for an invocation directory
    pub fn project_dir(&self, workspace_dir: &Path) -> PathBuf {
        match &self.project {
            ProjectReference::SelfDir => workspace_dir.to_path_buf(),
            ProjectReference::External(rel) => workspace_dir.join(rel),
        }
    }

    /// Value for `--project-dir`, if the project is not the invocation directory
    pub fn project_dir_arg(&self) -> Option<&Path> {
        match &self.project {
            ProjectReference::SelfDir => None,
            ProjectReference::External(rel) => Some(rel),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_scenario_layout() {
        let scenario = Scenario::builtin(ScenarioKind::ExternalProjectDirectory, ".charm");
        let ws = scenario.workspace_dir(Path::new("/job"));
        assert_eq!(ws, PathBuf::from("/job/another-directory"));
        assert_eq!(
            scenario.project_dir(&ws),
            PathBuf::from("/job/another-directory/charm-smoke-test")
        );
        assert_eq!(scenario.project_dir_arg(), Some(Path::new("charm-smoke-test")));
    }

    #[test]
    fn test_destructive_pattern_uses_host() {
        let scenario = Scenario::builtin(ScenarioKind::DestructiveMode, ".charm");
        let profile = HostProfile::new("ubuntu", "22.04", "amd64");
        assert_eq!(
            scenario.artifact.render(&profile),
            "destructive-mode-tests_ubuntu-22.04-amd64.charm"
        );
        assert_eq!(scenario.isolation, IsolationMode::Direct);
        assert!(scenario.pin_host_version);
    }

    #[test]
    fn test_suffix_pattern() {
        let pattern = ArtifactPattern::Suffix(".charm".to_string());
        let profile = HostProfile::new("ubuntu", "20.04", "amd64");
        let glob = glob::Pattern::new(&pattern.render(&profile)).unwrap();
        assert!(glob.matches("charm-smoke-test_ubuntu-20.04-amd64.charm"));
        assert!(!glob.matches("charm-smoke-test.zip"));
    }

    #[test]
    fn test_kind_names_round_trip_through_clap() {
        use clap::ValueEnum;
        for kind in ScenarioKind::ALL {
            assert_eq!(ScenarioKind::from_str(kind.as_str(), false), Ok(kind));
        }
    }
}
