//! CLI command definitions
//!
//! Defines the clap commands for the smoke harness.

use clap::Subcommand;
use std::path::PathBuf;

use crate::scenario::ScenarioKind;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a full smoke job: provision, install, every scenario, teardown
    Run {
        /// Directory holding the downloaded tool snap
        #[arg(long, conflicts_with = "preinstalled")]
        artifact_dir: Option<PathBuf>,

        /// Skip the install step and use the tool already on PATH
        #[arg(long)]
        preinstalled: bool,

        /// Root for scenario workspaces (default: current directory)
        #[arg(long)]
        workspace: Option<PathBuf>,

        /// YAML file with additional scenarios
        #[arg(long)]
        scenarios: Option<PathBuf>,

        /// Only run these built-in scenarios (repeatable)
        #[arg(long, value_enum)]
        only: Vec<ScenarioKind>,

        /// Print the job report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run one built-in scenario on an already provisioned host
    Scenario {
        /// Scenario to run
        #[arg(value_enum)]
        kind: ScenarioKind,

        /// Root for the scenario workspace (default: current directory)
        #[arg(long)]
        workspace: Option<PathBuf>,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the detected host and how it would be provisioned
    Profile {
        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the CI job matrix
    Matrix {
        /// The smoke-test matrix instead of the unit-test one
        #[arg(long)]
        smoke: bool,

        /// Output as a workflow `strategy.matrix` JSON value
        #[arg(long)]
        json: bool,
    },
}
