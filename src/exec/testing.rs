//! Scripted command runner for unit tests

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{CommandRunner, Invocation, Outcome};
use crate::common::Result;

/// What a scripted command does
#[derive(Debug, Clone)]
pub(crate) enum Response {
    /// Exit with this code
    Exit(i32),
    /// Succeed and print this on stdout
    Stdout(String),
    /// Never finish
    Hang,
    /// Write a scaffolded project into the working directory
    Scaffold,
    /// Write an artifact with this name into the working directory
    Pack(String),
}

/// Records every invocation and answers from a rule list
///
/// The first rule whose needle occurs in the rendered command line wins.
/// Commands matching no rule succeed silently.
#[derive(Default)]
pub(crate) struct ScriptedRunner {
    rules: Vec<(String, Response)>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on(mut self, needle: &str, response: Response) -> Self {
        self.rules.push((needle.to_string(), response));
        self
    }

    /// Rendered command lines in call order
    pub(crate) fn calls(&self) -> Vec<String> {
        self.invocations().iter().map(Invocation::command_line).collect()
    }

    pub(crate) fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn respond(&self, invocation: &Invocation) -> Response {
        let line = invocation.command_line();
        self.rules
            .iter()
            .find(|(needle, _)| line.contains(needle.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or(Response::Exit(0))
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, invocation: &Invocation) -> Result<Outcome> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(invocation.clone());
        }

        let cwd = invocation.cwd.clone().unwrap_or_else(|| ".".into());
        let ok = Outcome {
            status: Some(0),
            ..Default::default()
        };

        match self.respond(invocation) {
            Response::Exit(code) => Ok(Outcome {
                status: Some(code),
                ..Default::default()
            }),
            Response::Stdout(stdout) => Ok(Outcome { stdout, ..ok }),
            Response::Hang => std::future::pending().await,
            Response::Scaffold => {
                write_scaffold(&cwd)?;
                Ok(ok)
            }
            Response::Pack(name) => {
                std::fs::write(cwd.join(name), b"charm")?;
                Ok(ok)
            }
        }
    }
}

/// Minimal project as the tool's `init` would leave it
pub(crate) fn write_scaffold(dir: &Path) -> std::io::Result<()> {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "charm".to_string());
    std::fs::write(dir.join("metadata.yaml"), format!("name: {name}\n"))?;
    std::fs::write(
        dir.join("charmcraft.yaml"),
        "type: charm\nbases:\n  - build-on:\n      - name: \"ubuntu\"\n        channel: \"20.04\"\n    run-on:\n      - name: \"ubuntu\"\n        channel: \"20.04\"\n",
    )
}
