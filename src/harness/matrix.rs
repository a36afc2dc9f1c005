//! CI job matrix
//!
//! Unit tests fan out over runner image × interpreter version; the smoke
//! job runs once per runner image.

use serde::Serialize;
use serde_json::json;

use crate::common::config::MatrixConfig;
use crate::host::HostProfile;
use crate::provider::strategy::StrategyTable;

/// One job of the matrix
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatrixEntry {
    pub os: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub python: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Matrix {
    pub entries: Vec<MatrixEntry>,
}

impl Matrix {
    /// Every runner image paired with every interpreter version
    pub fn unit_tests(config: &MatrixConfig) -> Self {
        let entries = config
            .unit_os
            .iter()
            .flat_map(|os| {
                config.interpreters.iter().map(move |python| MatrixEntry {
                    os: os.clone(),
                    python: Some(python.clone()),
                })
            })
            .collect();
        Self { entries }
    }

    /// One entry per smoke runner image
    pub fn smoke(config: &MatrixConfig) -> Self {
        let entries = config
            .smoke_os
            .iter()
            .map(|os| MatrixEntry {
                os: os.clone(),
                python: None,
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Smoke entries the strategy table cannot provision
    pub fn unsupported<'m>(&'m self, table: &StrategyTable) -> Vec<&'m MatrixEntry> {
        self.entries
            .iter()
            .filter(|entry| match HostProfile::from_label(&entry.os) {
                Ok(profile) => profile.os_id != "ubuntu" || table.lookup(&profile.os_version).is_none(),
                Err(_) => true,
            })
            .collect()
    }

    /// `strategy.matrix` value for a workflow
    pub fn to_github_json(&self) -> serde_json::Value {
        json!({ "include": self.entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_matrix_is_cartesian() {
        let matrix = Matrix::unit_tests(&MatrixConfig::default());
        assert_eq!(matrix.len(), 12);
        assert_eq!(
            matrix.entries[0],
            MatrixEntry {
                os: "ubuntu-18.04".to_string(),
                python: Some("3.6".to_string()),
            }
        );
        assert!(matrix
            .entries
            .iter()
            .any(|e| e.os == "windows-2019" && e.python.as_deref() == Some("3.9")));
    }

    #[test]
    fn test_smoke_matrix_is_os_only() {
        let matrix = Matrix::smoke(&MatrixConfig::default());
        let oses: Vec<&str> = matrix.entries.iter().map(|e| e.os.as_str()).collect();
        assert_eq!(oses, vec!["ubuntu-18.04", "ubuntu-20.04"]);
        assert!(matrix.unsupported(&StrategyTable::builtin()).is_empty());
    }

    #[test]
    fn test_unsupported_entries() {
        let config = MatrixConfig {
            smoke_os: vec!["ubuntu-16.04".to_string(), "macos-10.15".to_string()],
            ..Default::default()
        };
        let matrix = Matrix::smoke(&config);
        assert_eq!(matrix.unsupported(&StrategyTable::builtin()).len(), 2);
    }

    #[test]
    fn test_github_json_shape() {
        let matrix = Matrix::smoke(&MatrixConfig::default());
        let value = matrix.to_github_json();
        assert_eq!(value["include"][1]["os"], "ubuntu-20.04");
        assert!(value["include"][0].get("python").is_none());
    }
}
