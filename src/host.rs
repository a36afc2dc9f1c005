//! Host identification
//!
//! The host profile picks the runtime setup strategy and supplies the
//! version that destructive-mode builds are pinned to.

use serde::Serialize;
use std::fmt;
use std::path::Path;

use crate::common::{Error, Result};

/// Operating system identity of the machine running the job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostProfile {
    /// Distribution id, e.g. `ubuntu`
    pub os_id: String,
    /// Distribution version, e.g. `22.04`
    pub os_version: String,
    /// Architecture in the packing tool's naming, e.g. `amd64`
    pub arch: String,
}

impl HostProfile {
    pub fn new(os_id: &str, os_version: &str, arch: &str) -> Self {
        Self {
            os_id: os_id.to_string(),
            os_version: os_version.to_string(),
            arch: arch.to_string(),
        }
    }

    /// Detect the running host
    ///
    /// Reads `ID` and `VERSION_ID` from the os-release file, falling back to
    /// `os_info` when the file is missing or incomplete.
    pub fn detect(os_release: &Path) -> Result<Self> {
        let from_file = std::fs::read_to_string(os_release)
            .ok()
            .and_then(|content| parse_os_release(&content));

        let (os_id, os_version) = match from_file {
            Some(pair) => pair,
            None => {
                tracing::debug!(
                    path = %os_release.display(),
                    "os-release unavailable, falling back to os_info"
                );
                detect_with_os_info()?
            }
        };

        Ok(Self {
            os_id,
            os_version,
            arch: host_arch().to_string(),
        })
    }

    /// Parse a runner label such as `ubuntu-22.04`, using the live architecture
    pub fn from_label(label: &str) -> Result<Self> {
        let (os_id, os_version) = label
            .rsplit_once('-')
            .filter(|(id, version)| !id.is_empty() && !version.is_empty())
            .ok_or_else(|| {
                Error::Config(format!(
                    "Invalid host label '{}'. Expected <os>-<version>, e.g. ubuntu-22.04",
                    label
                ))
            })?;
        Ok(Self::new(&os_id.to_lowercase(), os_version, host_arch()))
    }

    /// Runner-style label, e.g. `ubuntu-22.04`
    pub fn label(&self) -> String {
        format!("{}-{}", self.os_id, self.os_version)
    }

    /// Same distribution and version; architecture is not compared
    pub fn same_release(&self, other: &HostProfile) -> bool {
        self.os_id == other.os_id && self.os_version == other.os_version
    }
}

impl fmt::Display for HostProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.os_id, self.os_version, self.arch)
    }
}

/// Extract `ID` and `VERSION_ID` from os-release content
pub fn parse_os_release(content: &str) -> Option<(String, String)> {
    let mut id = None;
    let mut version = None;

    for line in content.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
        match key.trim() {
            "ID" => id = Some(value.to_lowercase()),
            "VERSION_ID" => version = Some(value.to_string()),
            _ => {}
        }
    }

    Some((id?, version?))
}

fn detect_with_os_info() -> Result<(String, String)> {
    let info = os_info::get();
    let version = match info.version() {
        os_info::Version::Semantic(major, minor, _) => format!("{major}.{minor:02}"),
        os_info::Version::Custom(v) => v.clone(),
        os_info::Version::Rolling(Some(v)) => v.clone(),
        _ => {
            return Err(Error::Config(format!(
                "Could not determine the version of {}. Pass --host <os>-<version>",
                info.os_type()
            )))
        }
    };
    Ok((info.os_type().to_string().to_lowercase(), version))
}

/// Architecture of this build in the packing tool's naming
pub fn host_arch() -> &'static str {
    translate_arch(std::env::consts::ARCH)
}

/// Map a machine architecture name to the packing tool's name
pub fn translate_arch(machine: &str) -> &str {
    match machine {
        "x86_64" | "AMD64" | "amd64" => "amd64",
        "aarch64" | "arm64" => "arm64",
        "arm" | "armv7l" => "armhf",
        "x86" | "i686" => "i386",
        "powerpc" | "ppc" => "powerpc",
        "ppc64le" => "ppc64el",
        "powerpc64" if cfg!(target_endian = "little") => "ppc64el",
        "powerpc64" => "ppc64",
        other => other,
    }
}
