//! Runtime setup strategies per OS version
//!
//! Older hosts ship LXD as a deb which has to be swapped for the snap;
//! newer ones already carry the snap and only need a refresh. New releases
//! are supported by adding a row to the table (or a config override).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::exec::Invocation;

/// How the isolation runtime is brought up to date on a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SetupStrategy {
    /// Remove the distro packages, then install the snap
    InstallFresh,
    /// Refresh the preinstalled snap
    Refresh,
}

impl fmt::Display for SetupStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupStrategy::InstallFresh => write!(f, "install-fresh"),
            SetupStrategy::Refresh => write!(f, "refresh"),
        }
    }
}

impl SetupStrategy {
    /// Named steps that carry out this strategy
    pub fn steps(self, elevate: bool) -> Vec<(&'static str, Invocation)> {
        match self {
            SetupStrategy::InstallFresh => vec![
                (
                    "remove distro lxd",
                    Invocation::new("apt-get")
                        .args(["remove", "-qy", "lxd", "lxd-client"])
                        .privileged(elevate),
                ),
                (
                    "install lxd snap",
                    Invocation::new("snap")
                        .args(["install", "lxd"])
                        .privileged(elevate),
                ),
            ],
            SetupStrategy::Refresh => vec![(
                "refresh lxd snap",
                Invocation::new("snap")
                    .args(["refresh", "lxd"])
                    .privileged(elevate),
            )],
        }
    }
}

/// Built-in Ubuntu releases and their strategy
static STRATEGIES: &[(&str, SetupStrategy)] = &[
    ("18.04", SetupStrategy::InstallFresh),
    ("20.04", SetupStrategy::Refresh),
    ("22.04", SetupStrategy::Refresh),
    ("24.04", SetupStrategy::Refresh),
];

/// Lookup table from OS version to setup strategy
#[derive(Debug, Clone)]
pub struct StrategyTable {
    entries: BTreeMap<String, SetupStrategy>,
}

impl StrategyTable {
    /// Table with only the built-in rows
    pub fn builtin() -> Self {
        Self {
            entries: STRATEGIES
                .iter()
                .map(|(version, strategy)| (version.to_string(), *strategy))
                .collect(),
        }
    }

    /// Built-in rows extended (or overridden) by configuration
    pub fn with_overrides(overrides: &HashMap<String, SetupStrategy>) -> Self {
        let mut table = Self::builtin();
        for (version, strategy) in overrides {
            table.entries.insert(version.clone(), *strategy);
        }
        table
    }

    pub fn lookup(&self, os_version: &str) -> Option<SetupStrategy> {
        self.entries.get(os_version).copied()
    }

    /// All known versions, sorted
    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_branches() {
        let table = StrategyTable::builtin();
        assert_eq!(table.lookup("18.04"), Some(SetupStrategy::InstallFresh));
        assert_eq!(table.lookup("20.04"), Some(SetupStrategy::Refresh));
        assert_eq!(table.lookup("22.04"), Some(SetupStrategy::Refresh));
        assert_eq!(table.lookup("16.04"), None);
    }

    #[test]
    fn test_overrides_extend_and_replace() {
        let mut overrides = HashMap::new();
        overrides.insert("24.10".to_string(), SetupStrategy::Refresh);
        overrides.insert("20.04".to_string(), SetupStrategy::InstallFresh);

        let table = StrategyTable::with_overrides(&overrides);
        assert_eq!(table.lookup("24.10"), Some(SetupStrategy::Refresh));
        assert_eq!(table.lookup("20.04"), Some(SetupStrategy::InstallFresh));
        assert!(table.versions().any(|v| v == "18.04"));
    }

    #[test]
    fn test_install_fresh_removes_before_installing() {
        let steps: Vec<String> = SetupStrategy::InstallFresh
            .steps(true)
            .into_iter()
            .map(|(_, inv)| inv.command_line())
            .collect();
        assert_eq!(
            steps,
            vec![
                "sudo apt-get remove -qy lxd lxd-client",
                "sudo snap install lxd",
            ]
        );
    }

    #[test]
    fn test_refresh_is_single_step() {
        let steps = SetupStrategy::Refresh.steps(false);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].1.command_line(), "snap refresh lxd");
    }
}
