//! Prebuilt tool installation
//!
//! The snap built by an earlier CI job is downloaded into a directory. It is
//! installed unsigned and with classic confinement, then the directory is
//! emptied so a later step cannot pick up a stale artifact.

use std::path::{Path, PathBuf};

use glob::Pattern;

use crate::common::config::InstallerConfig;
use crate::common::{Error, Result};
use crate::exec::{CommandRunner, Invocation};
use crate::provider::{Environment, ReadinessState};

/// The tool artifact as installed on the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledArtifact {
    pub path: PathBuf,
}

pub struct ArtifactInstaller<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a InstallerConfig,
    elevate: bool,
}

impl<'a> ArtifactInstaller<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &'a InstallerConfig, elevate: bool) -> Self {
        Self {
            runner,
            config,
            elevate,
        }
    }

    /// Find the single artifact in `dir` matching the configured pattern
    pub fn resolve(&self, dir: &Path) -> Result<PathBuf> {
        let pattern = format!(
            "{}/{}",
            Pattern::escape(&dir.to_string_lossy()),
            self.config.pattern
        );
        let entries = glob::glob(&pattern)
            .map_err(|e| Error::Install(format!("Invalid artifact pattern '{}': {}", pattern, e)))?;

        let mut matches: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file())
            .collect();
        matches.sort();

        match matches.len() {
            1 => Ok(matches.remove(0)),
            0 => Err(Error::Install(format!(
                "No artifact matching '{}' in {}",
                self.config.pattern,
                dir.display()
            ))),
            n => Err(Error::Install(format!(
                "Expected one artifact matching '{}' in {}, found {}",
                self.config.pattern,
                dir.display(),
                n
            ))),
        }
    }

    /// Install the artifact from `artifact_dir`, then empty the directory
    pub async fn install(&self, artifact_dir: &Path, env: &Environment) -> Result<InstalledArtifact> {
        if env.state() == ReadinessState::Destroyed {
            return Err(Error::Install(
                "Environment was destroyed before install".to_string(),
            ));
        }

        let artifact = self.resolve(artifact_dir)?;
        tracing::info!(artifact = %artifact.display(), "Installing tool");

        let invocation = Invocation::new("snap")
            .args(["install", "--dangerous", "--classic"])
            .arg(artifact.to_string_lossy())
            .privileged(self.elevate);
        let outcome = self.runner.run(&invocation).await?;
        if !outcome.success() {
            return Err(Error::Install(format!(
                "'{}' exited with {:?}",
                invocation, outcome.status
            )));
        }

        remove_contents(artifact_dir);
        Ok(InstalledArtifact { path: artifact })
    }
}

/// Delete everything inside `dir`, keeping `dir` itself
///
/// Failures are logged only; the install already succeeded.
fn remove_contents(dir: &Path) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), "Could not list artifact directory: {}", e);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let removed = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        if let Err(e) = removed {
            tracing::warn!(path = %path.display(), "Could not remove downloaded artifact: {}", e);
        }
    }
}
