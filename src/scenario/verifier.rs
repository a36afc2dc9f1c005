//! Artifact presence checks

use std::path::{Path, PathBuf};

use glob::Pattern;

use super::{ProjectReference, Scenario};
use crate::common::{Error, Result};
use crate::host::HostProfile;

pub struct ScenarioVerifier<'p> {
    profile: &'p HostProfile,
}

impl<'p> ScenarioVerifier<'p> {
    pub fn new(profile: &'p HostProfile) -> Self {
        Self { profile }
    }

    /// Rendered file name glob the scenario must produce
    pub fn expected_pattern(&self, scenario: &Scenario) -> String {
        scenario.artifact.render(self.profile)
    }

    /// Check that `pack` left the artifact in the invocation directory
    ///
    /// With an external project, the project directory itself must stay
    /// free of artifacts.
    pub fn verify(&self, scenario: &Scenario, workspace_dir: &Path) -> Result<PathBuf> {
        let rendered = self.expected_pattern(scenario);
        let pattern = Pattern::new(&rendered)
            .map_err(|e| Error::Internal(format!("Bad artifact pattern '{}': {}", rendered, e)))?;

        let artifact = find_match(&pattern, workspace_dir)?.ok_or_else(|| Error::Verification {
            pattern: rendered.clone(),
            directory: workspace_dir.to_path_buf(),
        })?;

        if let ProjectReference::External(_) = scenario.project {
            let project_dir = scenario.project_dir(workspace_dir);
            if let Some(stray) = find_match(&pattern, &project_dir)? {
                return Err(Error::StrayArtifact { path: stray });
            }
        }

        tracing::debug!(scenario = %scenario.name, artifact = %artifact.display(), "Artifact present");
        Ok(artifact)
    }
}

/// First regular file in `dir` whose name matches, if any
fn find_match(pattern: &Pattern, dir: &Path) -> Result<Option<PathBuf>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let mut found: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| Error::file_read(dir, e))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .map(|name| pattern.matches(&name.to_string_lossy()))
                .unwrap_or(false)
        })
        .collect();
    found.sort();
    Ok(found.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::ScenarioKind;

    fn profile() -> HostProfile {
        HostProfile::new("ubuntu", "22.04", "amd64")
    }

    #[test]
    fn test_missing_artifact_names_pattern_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        let profile = profile();
        let verifier = ScenarioVerifier::new(&profile);
        let scenario = Scenario::builtin(ScenarioKind::DefaultDirectory, ".charm");

        match verifier.verify(&scenario, dir.path()).unwrap_err() {
            Error::Verification { pattern, directory } => {
                assert_eq!(pattern, "*.charm");
                assert_eq!(directory, dir.path());
            }
            other => panic!("Expected Verification error, got {other:?}"),
        }
    }

    #[test]
    fn test_exact_name_must_match_host() {
        let dir = tempfile::tempdir().unwrap();
        let profile = profile();
        let verifier = ScenarioVerifier::new(&profile);
        let scenario = Scenario::builtin(ScenarioKind::DestructiveMode, ".charm");

        std::fs::write(
            dir.path().join("destructive-mode-tests_ubuntu-20.04-amd64.charm"),
            b"",
        )
        .unwrap();
        assert!(verifier.verify(&scenario, dir.path()).is_err());

        std::fs::write(
            dir.path().join("destructive-mode-tests_ubuntu-22.04-amd64.charm"),
            b"",
        )
        .unwrap();
        let found = verifier.verify(&scenario, dir.path()).unwrap();
        assert!(found.ends_with("destructive-mode-tests_ubuntu-22.04-amd64.charm"));
    }

    #[test]
    fn test_external_project_must_stay_clean() {
        let dir = tempfile::tempdir().unwrap();
        let profile = profile();
        let verifier = ScenarioVerifier::new(&profile);
        let scenario = Scenario::builtin(ScenarioKind::ExternalProjectDirectory, ".charm");
        let project = scenario.project_dir(dir.path());
        std::fs::create_dir_all(&project).unwrap();

        std::fs::write(dir.path().join("charm-smoke-test_ubuntu-22.04-amd64.charm"), b"").unwrap();
        assert!(verifier.verify(&scenario, dir.path()).is_ok());

        std::fs::write(project.join("charm-smoke-test_ubuntu-22.04-amd64.charm"), b"").unwrap();
        let err = verifier.verify(&scenario, dir.path()).unwrap_err();
        assert!(matches!(err, Error::StrayArtifact { .. }));
        assert_eq!(err.stage(), "verifying");
    }

    #[test]
    fn test_directories_do_not_count() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("fake.charm")).unwrap();
        let profile = profile();
        let verifier = ScenarioVerifier::new(&profile);
        let scenario = Scenario::builtin(ScenarioKind::DefaultDirectory, ".charm");
        assert!(verifier.verify(&scenario, dir.path()).is_err());
    }
}
