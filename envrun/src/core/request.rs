//! Job request and response payloads exchanged with clients.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::types::Diff;

/// A job: run the external runner, optionally after installing packages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub runner: RunnerInvocation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<InstallRequest>,
}

/// Arguments and configuration handed to the runner executable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunnerInvocation {
    /// Arguments placed before the config file reference.
    #[serde(default)]
    pub cmd: Vec<String>,
    /// Written to a transient JSON file for the duration of the run.
    #[serde(default)]
    pub config: Map<String, Value>,
}

/// Packages to install or upgrade before the runner starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRequest {
    pub pkgs: Vec<String>,
    /// Target environment; the configured default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
}

impl InstallRequest {
    pub fn env_or<'a>(&'a self, default_env: &'a str) -> &'a str {
        self.env.as_deref().unwrap_or(default_env)
    }
}

/// Outcome of the install step.
///
/// `diff` is only present when the installer succeeded; `error` is always
/// serialized (as `null` on success).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<Diff>,
    #[serde(default)]
    pub error: Option<String>,
}

impl InstallResult {
    pub fn succeeded(diff: Diff) -> Self {
        Self {
            diff: Some(diff),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            diff: None,
            error: Some(error.into()),
        }
    }
}

/// Response body, filled in step by step as the job progresses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_result: Option<InstallResult>,
    /// Runner stdout, passed through unparsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner_result: Option<String>,
}
