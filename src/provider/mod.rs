//! Isolation runtime provisioning
//!
//! Brings LXD up on the CI host: install or refresh per OS version, grant
//! the invoking user the runtime group, wait for the daemon and run its
//! one-time initialization. Teardown removes leftover build instances.

pub mod strategy;

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::common::config::ProviderConfig;
use crate::common::{Error, Result};
use crate::exec::{CommandRunner, Invocation, Outcome};
use crate::host::HostProfile;
use strategy::{SetupStrategy, StrategyTable};

/// Lifecycle of the runtime within one job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    Uninitialized,
    Waiting,
    Ready,
    Destroyed,
}

/// Kind of isolation runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Lxd,
}

/// Proof that the invoking user was added to the runtime's admin group
///
/// Only [`EnvironmentProvider::configure_privileges`] hands these out;
/// sandboxed tool invocations need one to run under the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupCapability {
    group: String,
}

impl GroupCapability {
    pub fn group(&self) -> &str {
        &self.group
    }
}

/// The provisioned runtime of the current job
#[derive(Debug)]
pub struct Environment {
    kind: ProviderKind,
    state: ReadinessState,
    strategy: Option<SetupStrategy>,
    group: Option<GroupCapability>,
    profile: HostProfile,
}

impl Environment {
    fn new(profile: &HostProfile, strategy: Option<SetupStrategy>) -> Self {
        Self {
            kind: ProviderKind::Lxd,
            state: ReadinessState::Uninitialized,
            strategy,
            group: None,
            profile: profile.clone(),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn state(&self) -> ReadinessState {
        self.state
    }

    pub fn strategy(&self) -> Option<SetupStrategy> {
        self.strategy
    }

    /// Group membership granted during this job, if any
    pub fn group_membership(&self) -> Option<&GroupCapability> {
        self.group.as_ref()
    }

    pub fn profile(&self) -> &HostProfile {
        &self.profile
    }
}

/// Drives the runtime's control surface
pub struct EnvironmentProvider<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a ProviderConfig,
    table: StrategyTable,
    elevate: bool,
}

impl<'a> EnvironmentProvider<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &'a ProviderConfig) -> Self {
        Self {
            runner,
            config,
            table: StrategyTable::with_overrides(&config.strategies),
            elevate: config.sudo.enabled(),
        }
    }

    /// Whether privileged commands are run through sudo
    pub fn elevate(&self) -> bool {
        self.elevate
    }

    pub fn strategy_table(&self) -> &StrategyTable {
        &self.table
    }

    /// Install or refresh the runtime for this host
    pub async fn provision(&self, profile: &HostProfile) -> Result<Environment> {
        let strategy = self.strategy_for(profile)?;
        tracing::info!(host = %profile, %strategy, "Provisioning LXD");

        for (step, invocation) in strategy.steps(self.elevate) {
            self.run_step(step, &invocation).await?;
        }

        Ok(Environment::new(profile, Some(strategy)))
    }

    /// Adopt a runtime provisioned by an earlier job step
    pub fn attach(&self, profile: &HostProfile) -> Environment {
        Environment::new(profile, self.table.lookup(&profile.os_version))
    }

    fn strategy_for(&self, profile: &HostProfile) -> Result<SetupStrategy> {
        let no_strategy = || Error::NoSetupStrategy {
            os_id: profile.os_id.clone(),
            os_version: profile.os_version.clone(),
        };
        if profile.os_id != "ubuntu" {
            return Err(no_strategy());
        }
        self.table.lookup(&profile.os_version).ok_or_else(no_strategy)
    }

    /// Make the invoking user a member of the runtime's admin group
    ///
    /// The membership is not revoked; it lasts for the rest of the job.
    pub async fn configure_privileges(&self, env: &mut Environment) -> Result<GroupCapability> {
        ensure_not_destroyed(env)?;

        let user = self
            .config
            .user
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                Error::Config(
                    "Cannot determine the user to add to the runtime group. Set provider.user or $USER"
                        .to_string(),
                )
            })?;
        let group = &self.config.group;

        self.run_step(
            "create runtime group",
            &Invocation::new("groupadd")
                .args(["--force", "--system", group.as_str()])
                .privileged(self.elevate),
        )
        .await?;
        self.run_step(
            "add user to runtime group",
            &Invocation::new("usermod")
                .args(["--append", "--groups", group.as_str(), user.as_str()])
                .privileged(self.elevate),
        )
        .await?;

        tracing::info!(%user, %group, "Granted runtime group membership");
        let capability = GroupCapability {
            group: group.clone(),
        };
        env.group = Some(capability.clone());
        Ok(capability)
    }

    /// Start the runtime daemon
    pub async fn start(&self, env: &mut Environment) -> Result<()> {
        ensure_not_destroyed(env)?;
        self.run_step(
            "start lxd",
            &Invocation::new("snap")
                .args(["start", "lxd"])
                .privileged(self.elevate),
        )
        .await?;
        Ok(())
    }

    /// Block until the runtime reports ready
    ///
    /// The daemon gets `timeout` to answer; the call itself is cut off shortly
    /// after that even if the control command hangs. Expiry is fatal.
    pub async fn wait_ready(&self, env: &mut Environment, timeout: Duration) -> Result<()> {
        ensure_not_destroyed(env)?;
        env.state = ReadinessState::Waiting;

        let secs = timeout.as_secs().max(1);
        let invocation = Invocation::new("lxd")
            .args(["waitready".to_string(), format!("--timeout={secs}")])
            .privileged(self.elevate);
        let grace = (timeout / 10).min(Duration::from_secs(5));

        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("  {spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(format!("Waiting for LXD (up to {secs}s)"));
        spinner.enable_steady_tick(Duration::from_millis(120));

        let deadline = timeout.saturating_add(grace);
        let result = tokio::time::timeout(deadline, self.runner.run(&invocation)).await;
        spinner.finish_and_clear();

        match result {
            Ok(Ok(outcome)) if outcome.success() => {
                env.state = ReadinessState::Ready;
                tracing::info!("LXD is ready");
                Ok(())
            }
            Ok(Ok(outcome)) => {
                tracing::error!(status = ?outcome.status, "LXD did not become ready");
                Err(Error::ReadinessTimeout { timeout })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                tracing::error!(?timeout, "Readiness wait hung past its deadline");
                Err(Error::ReadinessTimeout { timeout })
            }
        }
    }

    /// One-time automatic initialization of network and storage defaults
    pub async fn initialize(&self, env: &mut Environment) -> Result<()> {
        if env.state != ReadinessState::Ready {
            return Err(Error::Internal(format!(
                "Cannot initialize LXD while it is {:?}",
                env.state
            )));
        }
        self.run_step(
            "initialize lxd",
            &Invocation::new("lxd")
                .args(["init", "--auto"])
                .privileged(self.elevate),
        )
        .await?;
        Ok(())
    }

    /// Refresh the runtime snap; a no-op when already current
    pub async fn refresh(&self, env: &Environment) -> Result<()> {
        if env.state == ReadinessState::Destroyed {
            tracing::debug!("Environment destroyed, skipping refresh");
            return Ok(());
        }
        self.run_step(
            "refresh lxd snap",
            &Invocation::new("snap")
                .args(["refresh", "lxd"])
                .privileged(self.elevate),
        )
        .await?;
        Ok(())
    }

    /// Remove leftover build instances and mark the environment destroyed
    ///
    /// Returns the names of deleted instances. Destroying twice is a no-op.
    pub async fn destroy(&self, env: &mut Environment) -> Result<Vec<String>> {
        if env.state == ReadinessState::Destroyed {
            tracing::debug!("Environment already destroyed");
            return Ok(Vec::new());
        }
        if env.state != ReadinessState::Ready {
            // The daemon never came up, so it cannot hold instances either
            env.state = ReadinessState::Destroyed;
            return Ok(Vec::new());
        }

        let project = self.config.lxd_project.as_str();
        let list = Invocation::new("lxc")
            .args(["--project", project, "list", "--format", "csv", "--columns", "n"])
            .privileged(self.elevate);
        // The project only exists once a sandboxed build ran
        let names = match self.runner.run(&list).await {
            Ok(listing) if listing.success() => {
                instance_names(&listing, &self.config.instance_prefix)
            }
            Ok(listing) => {
                tracing::warn!(project, status = ?listing.status, "Could not list build instances, assuming none");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(project, "Could not list build instances, assuming none: {}", e);
                Vec::new()
            }
        };

        let mut deleted = Vec::new();
        for name in names {
            let invocation = Invocation::new("lxc")
                .args(["--project", project, "delete", "--force", name.as_str()])
                .privileged(self.elevate);
            match self.runner.run(&invocation).await {
                Ok(outcome) if outcome.success() => deleted.push(name),
                Ok(outcome) => {
                    tracing::warn!(instance = %name, status = ?outcome.status, "Failed to delete instance")
                }
                Err(e) => tracing::warn!(instance = %name, "Failed to delete instance: {}", e),
            }
        }

        env.state = ReadinessState::Destroyed;
        tracing::info!(count = deleted.len(), "Environment destroyed");
        Ok(deleted)
    }

    async fn run_step(&self, step: &str, invocation: &Invocation) -> Result<Outcome> {
        tracing::debug!(step, command = %invocation, "Runtime step");
        let outcome = self.runner.run(invocation).await?;
        if !outcome.success() {
            return Err(Error::provisioning(step, outcome.status));
        }
        Ok(outcome)
    }
}

fn ensure_not_destroyed(env: &Environment) -> Result<()> {
    if env.state == ReadinessState::Destroyed {
        return Err(Error::Internal("Environment already destroyed".to_string()));
    }
    Ok(())
}

/// Instance names from `lxc list --format csv --columns n` output
fn instance_names(listing: &Outcome, prefix: &str) -> Vec<String> {
    listing
        .stdout
        .lines()
        .map(str::trim)
        .filter(|name| name.starts_with(prefix))
        .map(String::from)
        .collect()
}
