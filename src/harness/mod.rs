//! Per-job state machine
//!
//! One [`HarnessController::run`] is one CI job: provision the runtime,
//! install the tool, run every scenario, then tear down. Teardown runs no
//! matter where the job stopped and never fails the job by itself.

pub mod matrix;

use std::path::PathBuf;
use std::time::Duration;

use colored::Colorize;
use serde::Serialize;

use crate::common::config::Config;
use crate::common::Result;
use crate::exec::CommandRunner;
use crate::host::HostProfile;
use crate::installer::ArtifactInstaller;
use crate::provider::{Environment, EnvironmentProvider};
use crate::scenario::driver::{ExecutionContext, InvocationDriver};
use crate::scenario::verifier::ScenarioVerifier;
use crate::scenario::{IsolationMode, Scenario};

/// Where the job is
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Provisioning,
    Installing,
    RunningScenario { index: usize },
    Verifying { index: usize },
    Done,
    Failed { stage: String, reason: String },
    Teardown,
}

/// How the tool under test gets onto the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallSource {
    /// Install the single snap found in this directory
    Artifact(PathBuf),
    /// Use whatever is already installed
    Preinstalled,
}

/// What one job does
#[derive(Debug, Clone)]
pub struct JobPlan {
    pub install: InstallSource,
    /// Scenario workspaces are created below this directory
    pub workspace_root: PathBuf,
    pub scenarios: Vec<Scenario>,
    pub ready_timeout: Duration,
}

/// Result of one scenario within a job
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub artifact: Option<PathBuf>,
    pub passed: bool,
}

/// Final account of a job
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub host: HostProfile,
    /// Last state before teardown: `Done` or `Failed`
    pub state: JobState,
    pub scenarios: Vec<ScenarioReport>,
    pub failure: Option<String>,
    pub teardown_warnings: Vec<String>,
}

impl JobReport {
    pub fn passed(&self) -> bool {
        self.state == JobState::Done
    }
}

pub struct HarnessController<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a Config,
    profile: &'a HostProfile,
    plan: &'a JobPlan,
    state: JobState,
    history: Vec<JobState>,
    progress: Progress,
}

impl<'a> HarnessController<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        config: &'a Config,
        profile: &'a HostProfile,
        plan: &'a JobPlan,
    ) -> Self {
        Self {
            runner,
            config,
            profile,
            plan,
            state: JobState::Idle,
            history: vec![JobState::Idle],
            progress: Progress::default(),
        }
    }

    /// Keep stdout free of progress lines, e.g. when it carries the JSON report
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.progress = Progress { quiet };
        self
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    /// Every state the job passed through, in order
    pub fn history(&self) -> &[JobState] {
        &self.history
    }

    fn transition(&mut self, next: JobState) {
        tracing::info!(from = ?self.state, to = ?next, "Job state");
        self.history.push(next.clone());
        self.state = next;
    }

    /// Run the job to completion
    pub async fn run(self) -> JobReport {
        self.run_with_history().await.0
    }

    /// Run the job and also return its state history
    pub async fn run_with_history(mut self) -> (JobReport, Vec<JobState>) {
        let (runner, config, profile, plan) = (self.runner, self.config, self.profile, self.plan);
        let provider = EnvironmentProvider::new(runner, &config.provider);
        let driver = InvocationDriver::new(runner, &config.tool, profile, &plan.workspace_root);
        let progress = self.progress;

        progress.header(profile);

        let mut env: Option<Environment> = None;
        let mut scenarios: Vec<ScenarioReport> = plan
            .scenarios
            .iter()
            .map(|s| ScenarioReport {
                name: s.name.clone(),
                artifact: None,
                passed: false,
            })
            .collect();

        let outcome = self
            .execute(&provider, &driver, &mut env, &mut scenarios)
            .await;

        let failure = match outcome {
            Ok(()) => {
                self.transition(JobState::Done);
                None
            }
            Err(e) => {
                let reason = e.to_string();
                progress.failed(&reason, e.stage());
                tracing::error!(stage = e.stage(), "Job failed: {}", reason);
                self.transition(JobState::Failed {
                    stage: e.stage().to_string(),
                    reason: reason.clone(),
                });
                Some(reason)
            }
        };
        let final_state = self.state.clone();

        self.transition(JobState::Teardown);
        let teardown_warnings = teardown(&provider, &driver, env.as_mut(), &plan.scenarios).await;

        let report = JobReport {
            host: profile.clone(),
            state: final_state,
            scenarios,
            failure,
            teardown_warnings,
        };
        progress.summary(&report);
        (report, self.history)
    }

    async fn execute(
        &mut self,
        provider: &EnvironmentProvider<'_>,
        driver: &InvocationDriver<'_>,
        env_slot: &mut Option<Environment>,
        reports: &mut [ScenarioReport],
    ) -> Result<()> {
        let (runner, config, profile, plan) = (self.runner, self.config, self.profile, self.plan);
        let progress = self.progress;

        self.transition(JobState::Provisioning);
        let env = env_slot.insert(provider.provision(profile).await?);
        progress.step_done("Provisioned LXD");

        let group = provider.configure_privileges(env).await?;
        provider.start(env).await?;
        provider.wait_ready(env, plan.ready_timeout).await?;
        provider.initialize(env).await?;
        progress.step_done("LXD ready");

        self.transition(JobState::Installing);
        match &plan.install {
            InstallSource::Artifact(dir) => {
                let installer = ArtifactInstaller::new(runner, &config.installer, provider.elevate());
                let installed = installer.install(dir, env).await?;
                progress.step_done(&format!("Installed {}", installed.path.display()));
            }
            InstallSource::Preinstalled => {
                tracing::info!("Using preinstalled tool");
            }
        }

        let ctx = ExecutionContext::new(provider.elevate(), Some(group));
        let verifier = ScenarioVerifier::new(profile);

        for (index, scenario) in plan.scenarios.iter().enumerate() {
            self.transition(JobState::RunningScenario { index });
            let packed = driver.prepare_and_pack(scenario, &ctx).await?;

            self.transition(JobState::Verifying { index });
            let artifact = driver.verify_and_clean(&packed, &ctx, &verifier).await?;

            reports[index].artifact = Some(artifact);
            reports[index].passed = true;
            progress.step_done(&format!("Scenario {}", scenario.name));

            // A scenario's workspace does not outlive it
            if let Err(e) = driver.discard(scenario) {
                tracing::warn!(scenario = %scenario.name, "Could not remove workspace: {}", e);
            }
        }

        Ok(())
    }
}

/// Destroy the environment and remove every scenario workspace
///
/// Problems are collected as warnings.
async fn teardown(
    provider: &EnvironmentProvider<'_>,
    driver: &InvocationDriver<'_>,
    env: Option<&mut Environment>,
    scenarios: &[Scenario],
) -> Vec<String> {
    let mut warnings = Vec::new();

    if let Some(env) = env {
        if let Err(e) = provider.destroy(env).await {
            tracing::warn!("Teardown: failed to destroy environment: {}", e);
            warnings.push(format!("destroy environment: {e}"));
        }
    }

    for scenario in scenarios {
        if let Err(e) = driver.discard(scenario) {
            tracing::warn!(scenario = %scenario.name, "Teardown: failed to remove workspace: {}", e);
            warnings.push(format!("remove workspace of {}: {e}", scenario.name));
        }
    }

    warnings
}

/// Run one scenario on a host whose runtime and tool are already set up
pub async fn run_single(
    runner: &dyn CommandRunner,
    config: &Config,
    profile: &HostProfile,
    scenario: &Scenario,
    workspace_root: PathBuf,
    quiet: bool,
) -> Result<ScenarioReport> {
    let provider = EnvironmentProvider::new(runner, &config.provider);
    let driver = InvocationDriver::new(runner, &config.tool, profile, workspace_root);

    let group = match scenario.isolation {
        IsolationMode::Sandboxed => {
            let mut env = provider.attach(profile);
            Some(provider.configure_privileges(&mut env).await?)
        }
        IsolationMode::Direct => None,
    };
    let ctx = ExecutionContext::new(provider.elevate(), group);
    let verifier = ScenarioVerifier::new(profile);

    let result = driver.run_scenario(scenario, &ctx, &verifier).await;
    if let Err(e) = driver.discard(scenario) {
        tracing::warn!(scenario = %scenario.name, "Could not remove workspace: {}", e);
    }

    let result = result?;
    Progress { quiet }.step_done(&format!("Scenario {}", result.scenario));
    Ok(ScenarioReport {
        name: result.scenario,
        artifact: Some(result.artifact),
        passed: true,
    })
}

/// Human-readable progress on stdout
#[derive(Debug, Clone, Copy, Default)]
struct Progress {
    quiet: bool,
}

impl Progress {
    fn header(self, profile: &HostProfile) {
        if self.quiet {
            return;
        }
        println!(
            "\n{} {}",
            "Smoke test on".blue().bold(),
            profile.to_string().white().bold()
        );
    }

    fn step_done(self, message: &str) {
        if !self.quiet {
            println!("  {} {}", "✓".green(), message);
        }
    }

    fn failed(self, reason: &str, stage: &str) {
        if !self.quiet {
            println!("  {} {} ({})", "✗".red(), reason.red(), stage);
        }
    }

    fn summary(self, report: &JobReport) {
        if self.quiet {
            return;
        }
        let passed = report.scenarios.iter().filter(|s| s.passed).count();
        let verdict = if report.passed() {
            "PASSED".green().bold()
        } else {
            "FAILED".red().bold()
        };
        println!(
            "\n{} {}/{} scenarios passed",
            verdict,
            passed,
            report.scenarios.len()
        );
        for warning in &report.teardown_warnings {
            println!("  {} {}", "!".yellow(), warning.dimmed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::SudoMode;
    use crate::exec::testing::{Response, ScriptedRunner};
    use crate::scenario::ScenarioKind;

    fn config() -> Config {
        let mut config = Config::default();
        config.provider.sudo = SudoMode::Never;
        config.provider.user = Some("runner".to_string());
        config
    }

    fn plan(root: &std::path::Path) -> JobPlan {
        JobPlan {
            install: InstallSource::Preinstalled,
            workspace_root: root.to_path_buf(),
            scenarios: Scenario::builtins(&ScenarioKind::ALL, ".charm"),
            ready_timeout: Duration::from_secs(5),
        }
    }

    fn happy_runner() -> ScriptedRunner {
        ScriptedRunner::new()
            .on("init --author", Response::Scaffold)
            .on(
                "--destructive-mode",
                Response::Pack("destructive-mode-tests_ubuntu-22.04-amd64.charm".into()),
            )
            .on("pack", Response::Pack("charm-smoke-test_ubuntu-20.04-amd64.charm".into()))
    }

    #[tokio::test]
    async fn test_happy_path_runs_every_scenario() {
        let root = tempfile::tempdir().unwrap();
        let config = config();
        let profile = HostProfile::new("ubuntu", "22.04", "amd64");
        let plan = plan(root.path());
        let runner = happy_runner();

        let (report, history) = HarnessController::new(&runner, &config, &profile, &plan)
            .run_with_history()
            .await;

        assert!(report.passed(), "{:?}", report.failure);
        assert_eq!(report.scenarios.len(), 3);
        assert!(report.scenarios.iter().all(|s| s.passed));
        assert_eq!(
            report.scenarios[2]
                .artifact
                .as_ref()
                .and_then(|p| p.file_name())
                .unwrap(),
            "destructive-mode-tests_ubuntu-22.04-amd64.charm"
        );
        assert_eq!(history.first(), Some(&JobState::Idle));
        assert!(history.contains(&JobState::Verifying { index: 2 }));
        assert_eq!(history.last(), Some(&JobState::Teardown));

        let calls = runner.calls();
        assert_eq!(calls[0], "snap refresh lxd");
        assert!(calls.contains(&"lxd init --auto".to_string()));
        assert!(calls.iter().any(|c| c.starts_with("lxc --project charmcraft list")));
        // Workspaces are gone after the job
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_provisioning_failure_skips_scenarios_but_tears_down() {
        let root = tempfile::tempdir().unwrap();
        let config = config();
        let profile = HostProfile::new("ubuntu", "20.04", "amd64");
        let plan = plan(root.path());
        let runner = ScriptedRunner::new().on("snap refresh lxd", Response::Exit(1));

        let (report, history) = HarnessController::new(&runner, &config, &profile, &plan)
            .run_with_history()
            .await;

        assert!(!report.passed());
        match &report.state {
            JobState::Failed { stage, .. } => assert_eq!(stage, "provisioning"),
            other => panic!("Expected Failed, got {other:?}"),
        }
        assert!(!runner.calls().iter().any(|c| c.contains("charmcraft")));
        assert!(report.scenarios.iter().all(|s| !s.passed));
        assert_eq!(history.last(), Some(&JobState::Teardown));
        assert!(!history
            .iter()
            .any(|s| matches!(s, JobState::RunningScenario { .. })));
    }

    #[tokio::test]
    async fn test_verification_failure_fails_job() {
        let root = tempfile::tempdir().unwrap();
        let config = config();
        let profile = HostProfile::new("ubuntu", "22.04", "amd64");
        let plan = plan(root.path());
        // pack succeeds without producing anything
        let runner = ScriptedRunner::new().on("init --author", Response::Scaffold);

        let report = HarnessController::new(&runner, &config, &profile, &plan)
            .run()
            .await;

        match &report.state {
            JobState::Failed { stage, reason } => {
                assert_eq!(stage, "verifying");
                assert!(reason.contains("*.charm"));
            }
            other => panic!("Expected Failed, got {other:?}"),
        }
        // The failed scenario is still cleaned before teardown
        let calls = runner.calls();
        let pack = calls
            .iter()
            .position(|c| c == "sg lxd -c 'charmcraft pack --verbose'")
            .unwrap();
        assert_eq!(calls[pack + 1], "sg lxd -c 'charmcraft clean --verbose'");
        // The environment is still destroyed
        assert!(runner
            .calls()
            .iter()
            .any(|c| c.starts_with("lxc --project charmcraft list")));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_readiness_timeout_is_fatal() {
        let root = tempfile::tempdir().unwrap();
        let config = config();
        let profile = HostProfile::new("ubuntu", "22.04", "amd64");
        let mut plan = plan(root.path());
        plan.ready_timeout = Duration::from_millis(50);
        let runner = ScriptedRunner::new().on("waitready", Response::Hang);

        let report = HarnessController::new(&runner, &config, &profile, &plan)
            .run()
            .await;

        match &report.state {
            JobState::Failed { stage, .. } => assert_eq!(stage, "readiness"),
            other => panic!("Expected Failed, got {other:?}"),
        }
        assert!(!runner.calls().iter().any(|c| c.contains("init --auto")));
    }

    #[tokio::test]
    async fn test_unknown_host_version_fails_provisioning() {
        let root = tempfile::tempdir().unwrap();
        let config = config();
        let profile = HostProfile::new("ubuntu", "99.04", "amd64");
        let plan = plan(root.path());
        let runner = ScriptedRunner::new();

        let report = HarnessController::new(&runner, &config, &profile, &plan)
            .run()
            .await;

        assert!(!report.passed());
        assert!(report.failure.unwrap().contains("99.04"));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_install_from_artifact_dir() {
        let root = tempfile::tempdir().unwrap();
        let artifacts = tempfile::tempdir().unwrap();
        std::fs::write(artifacts.path().join("charmcraft_1.0_amd64.snap"), b"").unwrap();

        let config = config();
        let profile = HostProfile::new("ubuntu", "22.04", "amd64");
        let mut plan = plan(root.path());
        plan.install = InstallSource::Artifact(artifacts.path().to_path_buf());
        plan.scenarios = Scenario::builtins(&[ScenarioKind::DefaultDirectory], ".charm");
        let runner = happy_runner();

        let report = HarnessController::new(&runner, &config, &profile, &plan)
            .run()
            .await;

        assert!(report.passed(), "{:?}", report.failure);
        let calls = runner.calls();
        let install = calls
            .iter()
            .position(|c| c.starts_with("snap install --dangerous --classic"))
            .unwrap();
        let first_init = calls.iter().position(|c| c.contains("init --author")).unwrap();
        assert!(install < first_init);
    }

    #[tokio::test]
    async fn test_run_single_destructive_needs_no_group() {
        let root = tempfile::tempdir().unwrap();
        let config = config();
        let profile = HostProfile::new("ubuntu", "22.04", "amd64");
        let runner = happy_runner();
        let scenario = Scenario::builtin(ScenarioKind::DestructiveMode, ".charm");

        let report = run_single(
            &runner,
            &config,
            &profile,
            &scenario,
            root.path().to_path_buf(),
            true,
        )
        .await
        .unwrap();

        assert!(report.passed);
        assert!(!runner.calls().iter().any(|c| c.starts_with("groupadd")));
        assert!(!root.path().join("destructive-mode-tests").exists());
    }
}
