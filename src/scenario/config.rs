//! Scenario files
//!
//! Extra scenarios are declared in YAML next to the built-in ones:
//!
//! ```yaml
//! scenarios:
//!   - name: nested-project
//!     workspace: outer
//!     project_dir: inner/project
//!     isolation: direct
//!     artifact:
//!       exact: "project_ubuntu-{os_version}-{arch}.charm"
//!     pin_host_version: true
//! ```

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::{ArtifactPattern, IsolationMode, ProjectReference, Scenario};
use crate::common::paths::is_contained;
use crate::common::{Error, Result};

/// Top-level layout of a scenario file
#[derive(Deserialize, Debug)]
pub struct ScenarioFile {
    pub scenarios: Vec<ScenarioEntry>,
}

/// One scenario as written in the file
#[derive(Deserialize, Debug)]
pub struct ScenarioEntry {
    pub name: String,
    /// Invocation directory relative to the workspace root
    pub workspace: PathBuf,
    /// Project directory relative to the invocation directory
    pub project_dir: Option<PathBuf>,
    #[serde(default)]
    pub isolation: IsolationMode,
    /// Defaults to any file with the tool's artifact suffix
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub artifact: Option<ArtifactPattern>,
    #[serde(default)]
    pub pin_host_version: bool,
}

impl ScenarioEntry {
    fn into_scenario(self, suffix: &str) -> Scenario {
        Scenario {
            name: self.name,
            workspace: self.workspace,
            project: match self.project_dir {
                Some(dir) => ProjectReference::External(dir),
                None => ProjectReference::SelfDir,
            },
            isolation: self.isolation,
            artifact: self
                .artifact
                .unwrap_or_else(|| ArtifactPattern::Suffix(suffix.to_string())),
            pin_host_version: self.pin_host_version,
        }
    }
}

/// Load and validate scenarios from a YAML file
pub fn load_scenarios(path: &Path, suffix: &str) -> Result<Vec<Scenario>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read scenario file '{}': {}",
            path.display(),
            e
        ))
    })?;
    parse_scenarios(&content, suffix)
}

/// Parse and validate scenarios from YAML text
pub fn parse_scenarios(content: &str, suffix: &str) -> Result<Vec<Scenario>> {
    let file: ScenarioFile = serde_yaml::from_str(content)
        .map_err(|e| Error::Config(format!("Failed to parse scenario file: {}", e)))?;

    let mut names = HashSet::new();
    let mut scenarios = Vec::with_capacity(file.scenarios.len());
    for entry in file.scenarios {
        if !names.insert(entry.name.clone()) {
            return Err(Error::Config(format!(
                "Duplicate scenario name '{}'",
                entry.name
            )));
        }
        if !is_contained(&entry.workspace) {
            return Err(Error::Config(format!(
                "Scenario '{}': workspace '{}' must be a relative path naming a directory, without '..'",
                entry.name,
                entry.workspace.display()
            )));
        }
        if let Some(dir) = &entry.project_dir {
            if !is_contained(dir) {
                return Err(Error::Config(format!(
                    "Scenario '{}': project_dir '{}' must be a relative path naming a directory, without '..'",
                    entry.name,
                    dir.display()
                )));
            }
        }
        scenarios.push(entry.into_scenario(suffix));
    }
    Ok(scenarios)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_entry() {
        let scenarios = parse_scenarios(
            r#"
scenarios:
  - name: nested
    workspace: outer
    project_dir: inner/project
    isolation: direct
    artifact:
      exact: "project_ubuntu-{os_version}-{arch}.charm"
    pin_host_version: true
  - name: plain
    workspace: plain
"#,
            ".charm",
        )
        .unwrap();

        assert_eq!(scenarios.len(), 2);
        let nested = &scenarios[0];
        assert_eq!(
            nested.project,
            ProjectReference::External(PathBuf::from("inner/project"))
        );
        assert_eq!(nested.isolation, IsolationMode::Direct);
        assert!(nested.pin_host_version);

        let plain = &scenarios[1];
        assert_eq!(plain.project, ProjectReference::SelfDir);
        assert_eq!(plain.isolation, IsolationMode::Sandboxed);
        assert_eq!(plain.artifact, ArtifactPattern::Suffix(".charm".to_string()));
    }

    #[test]
    fn test_rejects_escaping_workspace() {
        let err = parse_scenarios(
            "scenarios:\n  - name: bad\n    workspace: ../outside\n",
            ".charm",
        )
        .unwrap_err();
        assert!(err.to_string().contains("relative path"));
    }

    #[test]
    fn test_rejects_workspace_equal_to_root() {
        for workspace in [".", "./", "'./.'"] {
            let err = parse_scenarios(
                &format!("scenarios:\n  - name: here\n    workspace: {workspace}\n"),
                ".charm",
            )
            .unwrap_err();
            assert!(err.to_string().contains("relative path"), "{workspace}: {err}");
        }
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let err = parse_scenarios(
            "scenarios:\n  - name: a\n    workspace: x\n  - name: a\n    workspace: y\n",
            ".charm",
        )
        .unwrap_err();
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn test_missing_file() {
        let err = load_scenarios(Path::new("/nonexistent/scenarios.yaml"), ".charm").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
