//! Test-only helpers: a scripted command runner and canned outputs.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Result, anyhow};

use crate::io::config::ServiceConfig;
use crate::io::process::{CommandOutput, CommandRunner, CommandSpec};

/// A command the scripted runner received.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub spec: CommandSpec,
    /// Contents of every argument that named an existing file at call time.
    pub files: Vec<(String, String)>,
}

impl RecordedCall {
    pub fn file(&self, path: &str) -> Option<&str> {
        self.files
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, contents)| contents.as_str())
    }
}

/// Replays queued outputs in order and records each command it is given.
///
/// Running out of outputs is an error, so tests fail loudly when the
/// orchestrator spawns more than expected.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    outputs: Mutex<VecDeque<CommandOutput>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedRunner {
    pub fn new(outputs: Vec<CommandOutput>) -> Self {
        Self {
            outputs: Mutex::new(outputs.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn programs(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.spec.program).collect()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let files = spec
            .args
            .iter()
            .filter(|arg| Path::new(arg).is_file())
            .filter_map(|arg| fs::read_to_string(arg).ok().map(|c| (arg.clone(), c)))
            .collect();
        self.calls
            .lock()
            .map_err(|_| anyhow!("calls lock poisoned"))?
            .push(RecordedCall {
                spec: spec.clone(),
                files,
            });
        self.outputs
            .lock()
            .map_err(|_| anyhow!("outputs lock poisoned"))?
            .pop_front()
            .ok_or_else(|| anyhow!("unexpected command `{spec}`"))
    }
}

/// Successful exit with the given stdout.
pub fn ok_output(stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(0),
        stdout: stdout.as_bytes().to_vec(),
        ..CommandOutput::default()
    }
}

/// Failed exit with the given stderr.
pub fn failed_output(code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(code),
        stderr: stderr.as_bytes().to_vec(),
        ..CommandOutput::default()
    }
}

/// A command killed after running past its timeout.
pub fn timed_out_output() -> CommandOutput {
    CommandOutput {
        exit_code: None,
        timed_out: true,
        ..CommandOutput::default()
    }
}

/// `list --json` output for the given packages.
pub fn package_listing(pairs: &[(&str, &str)]) -> CommandOutput {
    let packages: Vec<serde_json::Value> = pairs
        .iter()
        .map(|(name, version)| {
            serde_json::json!({"name": name, "version": version, "channel": "conda-forge"})
        })
        .collect();
    ok_output(&serde_json::Value::Array(packages).to_string())
}

/// Config with a fixed environment list, so validation never spawns anything.
pub fn test_config() -> ServiceConfig {
    ServiceConfig {
        known_envs: vec!["notebook".to_string(), "cloudrun".to_string()],
        ..ServiceConfig::default()
    }
}
