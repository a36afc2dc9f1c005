//! charm-smoke - end-to-end smoke harness for the charm packing tool
//!
//! Provisions the LXD runtime on a CI host, installs the freshly built tool
//! snap and drives the tool's `init`, `pack` and `clean` commands through a
//! set of scenarios, checking the packed artifact after each one.

pub mod cli;
pub mod commands;
pub mod common;
pub mod exec;
pub mod harness;
pub mod host;
pub mod installer;
pub mod provider;
pub mod scenario;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use harness::{JobReport, JobState};
