//! External command execution
//!
//! Every call the harness makes to snap, lxd, the packing tool and the
//! group/privilege helpers goes through [`CommandRunner`]. The production
//! [`SystemRunner`] spawns real processes; tests substitute a scripted one.

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command as TokioCommand;

use crate::common::{output_tail, Error, Result};

/// A command line to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub envs: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Prefix with `sudo` when `elevate` is set
    pub fn privileged(self, elevate: bool) -> Self {
        if !elevate {
            return self;
        }
        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(self.program);
        args.extend(self.args);
        Self {
            program: "sudo".to_string(),
            args,
            cwd: self.cwd,
            envs: self.envs,
        }
    }

    /// Run the command line through `sg <group> -c`, picking up a group
    /// membership granted earlier in the same session
    pub fn under_group(self, group: &str) -> Self {
        let line = self.command_line();
        Self {
            program: "sg".to_string(),
            args: vec![group.to_string(), "-c".to_string(), line],
            cwd: self.cwd,
            envs: self.envs,
        }
    }

    /// Shell-quoted rendering of program and arguments
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Quote a word for POSIX sh
pub fn shell_quote(word: &str) -> String {
    if word.is_empty() {
        return "''".to_string();
    }
    let safe = word
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "_-./=:@%+,".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    /// Exit code, `None` when killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl Outcome {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Executes invocations
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion and capture output
    ///
    /// A non-zero exit is not an error at this level; callers map it to
    /// the error of their stage.
    async fn run(&self, invocation: &Invocation) -> Result<Outcome>;
}

/// Runs commands as real child processes
///
/// Children are killed when the future is dropped, so a timed out or
/// cancelled step leaves nothing behind.
#[derive(Debug, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, invocation: &Invocation) -> Result<Outcome> {
        tracing::debug!(command = %invocation, cwd = ?invocation.cwd, "Running command");

        let mut cmd = TokioCommand::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &invocation.envs {
            cmd.env(key, value);
        }

        let output = cmd.output().await.map_err(|e| Error::CommandSpawn {
            program: invocation.program.clone(),
            error: e.to_string(),
        })?;

        let outcome = Outcome {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if outcome.success() {
            tracing::trace!(stdout = %outcome.stdout, "Command succeeded");
        } else {
            tracing::warn!(
                command = %invocation,
                status = ?outcome.status,
                "Command failed:\n{}",
                output_tail(&format!("{}{}", outcome.stdout, outcome.stderr), 20)
            );
        }

        Ok(outcome)
    }
}

/// Whether a program resolves on PATH (or is an existing path)
pub fn resolve_program(program: &str) -> Option<PathBuf> {
    let as_path = Path::new(program);
    if as_path.components().count() > 1 {
        return as_path.is_file().then(|| as_path.to_path_buf());
    }
    which::which(program).ok()
}
