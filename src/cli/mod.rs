//! CLI command handling
//!
//! Dispatches CLI commands to the harness and formats output.

use std::collections::HashSet;
use std::path::PathBuf;

use colored::Colorize;
use serde_json::json;

use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::exec::{resolve_program, SystemRunner};
use crate::harness::matrix::Matrix;
use crate::harness::{self, HarnessController, InstallSource, JobPlan};
use crate::host::HostProfile;
use crate::provider::strategy::StrategyTable;
use crate::scenario::config::load_scenarios;
use crate::scenario::{Scenario, ScenarioKind};

/// Dispatch a CLI command
///
/// Returns whether the job passed; errors abort before a report exists.
pub async fn dispatch(command: Commands, config: &Config, host: Option<&str>) -> Result<bool> {
    match command {
        Commands::Run {
            artifact_dir,
            preinstalled,
            workspace,
            scenarios,
            only,
            json,
        } => {
            let install = if preinstalled {
                InstallSource::Preinstalled
            } else {
                match artifact_dir.or_else(|| config.installer.artifact_dir.clone()) {
                    Some(dir) => InstallSource::Artifact(dir),
                    None => {
                        return Err(Error::Config(
                            "No artifact directory. Pass --artifact-dir, set installer.artifact_dir, or use --preinstalled"
                                .to_string(),
                        ))
                    }
                }
            };

            let kinds = if only.is_empty() {
                ScenarioKind::ALL.to_vec()
            } else {
                only
            };
            let suffix = config.tool.artifact_suffix.as_str();
            let mut plan_scenarios = Scenario::builtins(&kinds, suffix);
            if let Some(path) = scenarios {
                plan_scenarios.extend(load_scenarios(&path, suffix)?);
            }
            ensure_unique_names(&plan_scenarios)?;

            let profile = resolve_profile(config, host)?;
            let plan = JobPlan {
                install,
                workspace_root: workspace_root(workspace)?,
                scenarios: plan_scenarios,
                ready_timeout: config.ready_timeout(),
            };

            let runner = SystemRunner::new();
            let report = HarnessController::new(&runner, config, &profile, &plan)
                .quiet(json)
                .run()
                .await;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            Ok(report.passed())
        }

        Commands::Scenario {
            kind,
            workspace,
            json,
        } => {
            let profile = resolve_profile(config, host)?;
            let scenario = Scenario::builtin(kind, &config.tool.artifact_suffix);
            let runner = SystemRunner::new();

            let report = harness::run_single(
                &runner,
                config,
                &profile,
                &scenario,
                workspace_root(workspace)?,
                json,
            )
            .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if let Some(artifact) = &report.artifact {
                println!("Artifact: {}", artifact.display());
            }
            Ok(report.passed)
        }

        Commands::Profile { json } => {
            let profile = resolve_profile(config, host)?;
            let table = StrategyTable::with_overrides(&config.provider.strategies);
            let strategy = if profile.os_id == "ubuntu" {
                table.lookup(&profile.os_version)
            } else {
                None
            };
            let tool = resolve_program(&config.tool.program);
            let lxd = resolve_program("lxd");

            if json {
                let value = json!({
                    "host": profile,
                    "label": profile.label(),
                    "strategy": strategy,
                    "tool": tool,
                    "lxd": lxd,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
                return Ok(true);
            }

            println!("{} {}", "Host:".cyan(), profile);
            match strategy {
                Some(strategy) => println!("{} {}", "Setup strategy:".cyan(), strategy),
                None => println!(
                    "{} {}",
                    "Setup strategy:".cyan(),
                    "none (unsupported version)".yellow()
                ),
            }
            print_program(&config.tool.program, tool.as_ref());
            print_program("lxd", lxd.as_ref());
            Ok(true)
        }

        Commands::Matrix { smoke, json } => {
            let matrix = if smoke {
                Matrix::smoke(&config.matrix)
            } else {
                Matrix::unit_tests(&config.matrix)
            };

            if smoke {
                let table = StrategyTable::with_overrides(&config.provider.strategies);
                for entry in matrix.unsupported(&table) {
                    tracing::warn!(os = %entry.os, "No runtime setup strategy for smoke runner");
                }
            }

            if json {
                println!("{}", serde_json::to_string(&matrix.to_github_json())?);
            } else {
                for entry in &matrix.entries {
                    match &entry.python {
                        Some(python) => println!("{:<16} python {}", entry.os, python),
                        None => println!("{}", entry.os),
                    }
                }
            }
            Ok(true)
        }
    }
}

/// Host profile from `--host` or detection
///
/// `--host` decides the runtime setup strategy, the destructive-mode base
/// pin and the expected artifact names, so a label naming a different
/// release than the running one is reported.
pub fn resolve_profile(config: &Config, host: Option<&str>) -> Result<HostProfile> {
    let Some(label) = host else {
        return HostProfile::detect(&config.host.os_release_path);
    };
    let profile = HostProfile::from_label(label)?;
    match HostProfile::detect(&config.host.os_release_path) {
        Ok(live) if !profile.same_release(&live) => {
            tracing::warn!(
                host = %profile,
                running = %live,
                "--host names a different release than the running host; packed artifacts will not match"
            );
        }
        Ok(_) => {}
        Err(e) => tracing::debug!("Could not detect running host: {}", e),
    }
    Ok(profile)
}

fn workspace_root(workspace: Option<PathBuf>) -> Result<PathBuf> {
    let root = match workspace {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    std::fs::create_dir_all(&root)?;
    Ok(root)
}

fn ensure_unique_names(scenarios: &[Scenario]) -> Result<()> {
    let mut seen = HashSet::new();
    for scenario in scenarios {
        if !seen.insert(scenario.name.as_str()) {
            return Err(Error::Config(format!(
                "Scenario '{}' is defined more than once",
                scenario.name
            )));
        }
    }
    Ok(())
}

fn print_program(name: &str, path: Option<&PathBuf>) {
    match path {
        Some(path) => println!("  {} {} ({})", "✓".green(), name, path.display()),
        None => println!("  {} {} {}", "✗".red(), name, "not found".dimmed()),
    }
}
