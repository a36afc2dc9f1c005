//! Drives the tool's `init`, `pack` and `clean` commands
//!
//! [`InvocationDriver::prepare_and_pack`] yields a [`PackedScenario`], and
//! only a packed scenario can be cleaned, so `clean` never runs ahead of
//! `pack`. Workspaces are recreated from scratch for every run.

use std::path::{Path, PathBuf};

use crate::common::config::ToolConfig;
use crate::common::paths::is_contained;
use crate::common::{output_tail, Error, Result};
use crate::exec::{CommandRunner, Invocation};
use crate::host::HostProfile;
use crate::provider::GroupCapability;

use super::verifier::ScenarioVerifier;
use super::{IsolationMode, Scenario};

/// How tool commands are run for the current job
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    elevate: bool,
    group: Option<GroupCapability>,
}

impl ExecutionContext {
    pub fn new(elevate: bool, group: Option<GroupCapability>) -> Self {
        Self { elevate, group }
    }

    /// Wrap a build command for the scenario's isolation mode
    fn apply(&self, invocation: Invocation, isolation: IsolationMode) -> Result<Invocation> {
        match isolation {
            IsolationMode::Sandboxed => {
                let group = self.group.as_ref().ok_or_else(|| {
                    Error::Internal(
                        "Sandboxed scenario requires runtime group membership".to_string(),
                    )
                })?;
                Ok(invocation.under_group(group.group()))
            }
            IsolationMode::Direct => Ok(invocation.privileged(self.elevate)),
        }
    }
}

/// A scenario whose `pack` succeeded
#[derive(Debug)]
pub struct PackedScenario<'s> {
    scenario: &'s Scenario,
    workspace_dir: PathBuf,
}

impl<'s> PackedScenario<'s> {
    pub fn scenario(&self) -> &'s Scenario {
        self.scenario
    }

    /// Directory `pack` ran in
    pub fn workspace_dir(&self) -> &Path {
        &self.workspace_dir
    }
}

/// Outcome of a complete scenario run
#[derive(Debug, Clone)]
pub struct InvocationResult {
    pub scenario: String,
    pub artifact: PathBuf,
}

pub struct InvocationDriver<'a> {
    runner: &'a dyn CommandRunner,
    tool: &'a ToolConfig,
    profile: &'a HostProfile,
    root: PathBuf,
}

impl<'a> InvocationDriver<'a> {
    /// Driver placing scenario workspaces below `root`
    pub fn new(
        runner: &'a dyn CommandRunner,
        tool: &'a ToolConfig,
        profile: &'a HostProfile,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            tool,
            profile,
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scaffold a fresh project and pack it
    pub async fn prepare_and_pack<'s>(
        &self,
        scenario: &'s Scenario,
        ctx: &ExecutionContext,
    ) -> Result<PackedScenario<'s>> {
        let workspace_dir = self.workspace_dir(scenario)?;
        let project_dir = scenario.project_dir(&workspace_dir);

        let mut pack = self.tool_command("pack");
        if self.tool.verbose {
            pack = pack.arg("--verbose");
        }
        if let Some(rel) = scenario.project_dir_arg() {
            pack = pack.arg("--project-dir").arg(rel.to_string_lossy());
        }
        if scenario.isolation == IsolationMode::Direct {
            pack = pack.arg("--destructive-mode");
        }
        let pack = ctx.apply(pack.current_dir(&workspace_dir), scenario.isolation)?;

        fresh_dir(&workspace_dir)?;
        std::fs::create_dir_all(&project_dir)?;
        tracing::info!(scenario = %scenario.name, dir = %workspace_dir.display(), "Preparing scenario");

        let init = self
            .tool_command("init")
            .args(["--author", self.tool.author.as_str()])
            .current_dir(&project_dir);
        self.invoke("init", &init).await?;

        if scenario.pin_host_version {
            pin_base_version(
                &project_dir.join("charmcraft.yaml"),
                &self.tool.scaffold_version,
                &self.profile.os_version,
            )?;
        }

        self.invoke("pack", &pack).await?;
        Ok(PackedScenario {
            scenario,
            workspace_dir,
        })
    }

    /// Remove build state of a packed scenario; safe to repeat
    pub async fn clean(&self, packed: &PackedScenario<'_>, ctx: &ExecutionContext) -> Result<()> {
        let scenario = packed.scenario;
        let mut clean = self.tool_command("clean");
        if self.tool.verbose {
            clean = clean.arg("--verbose");
        }
        if let Some(rel) = scenario.project_dir_arg() {
            clean = clean.arg("--project-dir").arg(rel.to_string_lossy());
        }
        let clean = ctx.apply(clean.current_dir(&packed.workspace_dir), scenario.isolation)?;
        self.invoke("clean", &clean).await
    }

    /// `init`, `pack`, verify, `clean` for one scenario
    ///
    /// `clean` is attempted even when verification fails.
    pub async fn run_scenario(
        &self,
        scenario: &Scenario,
        ctx: &ExecutionContext,
        verifier: &ScenarioVerifier<'_>,
    ) -> Result<InvocationResult> {
        let packed = self.prepare_and_pack(scenario, ctx).await?;
        let artifact = self.verify_and_clean(&packed, ctx, verifier).await?;
        Ok(InvocationResult {
            scenario: scenario.name.clone(),
            artifact,
        })
    }

    /// Verify a packed scenario, then `clean` it whatever the verdict
    ///
    /// A verification failure is reported ahead of a `clean` failure.
    pub async fn verify_and_clean(
        &self,
        packed: &PackedScenario<'_>,
        ctx: &ExecutionContext,
        verifier: &ScenarioVerifier<'_>,
    ) -> Result<PathBuf> {
        let verified = verifier.verify(packed.scenario, packed.workspace_dir());
        let cleaned = self.clean(packed, ctx).await;

        let artifact = verified?;
        cleaned?;
        Ok(artifact)
    }

    /// Remove a scenario's workspace
    pub fn discard(&self, scenario: &Scenario) -> Result<()> {
        let dir = self.workspace_dir(scenario)?;
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
            tracing::debug!(dir = %dir.display(), "Removed workspace");
        }
        Ok(())
    }

    /// Workspace below the root; never the root itself, since it gets deleted
    fn workspace_dir(&self, scenario: &Scenario) -> Result<PathBuf> {
        if !is_contained(&scenario.workspace) {
            return Err(Error::Config(format!(
                "Scenario '{}': workspace '{}' does not name a directory below {}",
                scenario.name,
                scenario.workspace.display(),
                self.root.display()
            )));
        }
        Ok(scenario.workspace_dir(&self.root))
    }

    fn tool_command(&self, subcommand: &str) -> Invocation {
        Invocation::new(self.tool.program.as_str()).arg(subcommand)
    }

    async fn invoke(&self, subcommand: &str, invocation: &Invocation) -> Result<()> {
        let outcome = self.runner.run(invocation).await?;
        if outcome.success() {
            tracing::info!(command = %invocation, "{} succeeded", subcommand);
            return Ok(());
        }
        tracing::error!(
            command = %invocation,
            status = ?outcome.status,
            "{} failed:\n{}",
            subcommand,
            output_tail(&format!("{}{}", outcome.stdout, outcome.stderr), 20)
        );
        Err(Error::invocation(subcommand, outcome.status))
    }
}

/// Recreate `dir` empty
fn fresh_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    std::fs::create_dir_all(dir)?;
    Ok(())
}

/// Replace every occurrence of the scaffold's base version with the host's
///
/// Returns the number of replacements.
pub fn pin_base_version(config: &Path, from: &str, to: &str) -> Result<usize> {
    let content = std::fs::read_to_string(config).map_err(|e| Error::file_read(config, e))?;
    let count = content.matches(from).count();
    if from != to && count > 0 {
        std::fs::write(config, content.replace(from, to))?;
    }
    tracing::info!(
        path = %config.display(),
        from,
        to,
        count,
        "Pinned base version to host"
    );
    Ok(count)
}
