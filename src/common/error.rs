//! Error types for the smoke harness
//!
//! Every variant maps to the job stage it aborts, so the build log names
//! the failing step together with the exit status of the tool behind it.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the smoke harness
#[derive(Error, Debug)]
pub enum Error {
    // === Provisioning Errors ===
    #[error("Provisioning step '{step}' failed ({})", describe_status(.status))]
    Provisioning { step: String, status: Option<i32> },

    #[error("No runtime setup strategy for {os_id} {os_version}. Add one under [provider.strategies] in the config file")]
    NoSetupStrategy { os_id: String, os_version: String },

    #[error("Runtime did not report ready within {:.1}s", .timeout.as_secs_f64())]
    ReadinessTimeout { timeout: Duration },

    // === Install Errors ===
    #[error("Artifact install failed: {0}")]
    Install(String),

    // === Scenario Errors ===
    #[error("'{subcommand}' failed ({})", describe_status(.status))]
    Invocation {
        subcommand: String,
        status: Option<i32>,
    },

    #[error("No artifact matching '{pattern}' in {}", .directory.display())]
    Verification { pattern: String, directory: PathBuf },

    #[error("Artifact unexpectedly produced in the referenced project directory: {}", .path.display())]
    StrayArtifact { path: PathBuf },

    // === Process Errors ===
    #[error("Failed to run '{program}': {error}")]
    CommandSpawn { program: String, error: String },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a provisioning error for a failed runtime step
    pub fn provisioning(step: &str, status: Option<i32>) -> Self {
        Self::Provisioning {
            step: step.to_string(),
            status,
        }
    }

    /// Create an invocation error for a failed tool subcommand
    pub fn invocation(subcommand: &str, status: Option<i32>) -> Self {
        Self::Invocation {
            subcommand: subcommand.to_string(),
            status,
        }
    }

    /// Create a file read error
    pub fn file_read(path: &std::path::Path, error: impl ToString) -> Self {
        Self::FileRead {
            path: path.display().to_string(),
            error: error.to_string(),
        }
    }

    /// Name of the harness stage this error aborts
    pub fn stage(&self) -> &'static str {
        match self {
            Error::Provisioning { .. } | Error::NoSetupStrategy { .. } => "provisioning",
            Error::ReadinessTimeout { .. } => "readiness",
            Error::Install(_) => "installing",
            Error::Invocation { .. } => "invocation",
            Error::Verification { .. } | Error::StrayArtifact { .. } => "verifying",
            Error::Config(_) | Error::ConfigParse(_) => "configuration",
            Error::CommandSpawn { .. }
            | Error::Io(_)
            | Error::FileRead { .. }
            | Error::Json(_)
            | Error::Internal(_) => "internal",
        }
    }
}

fn describe_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}
