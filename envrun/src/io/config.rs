//! Service configuration stored in `envrun.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "envrun.toml";

/// Service configuration (TOML).
///
/// Missing fields default to values that drive a conda installation and
/// `pangeo-forge-runner`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Environment targeted by install requests that do not name one.
    pub default_env: String,

    /// Environments that may be targeted. Empty means "ask the environment manager".
    pub known_envs: Vec<String>,

    pub env_manager: EnvManagerConfig,

    pub runner: RunnerConfig,

    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EnvManagerConfig {
    /// conda-compatible executable (`conda`, `mamba`, `micromamba`).
    pub program: String,

    /// Installer argv run inside the target environment; package specifiers are appended.
    pub installer: Vec<String>,
}

impl Default for EnvManagerConfig {
    fn default() -> Self {
        Self {
            program: "conda".to_string(),
            installer: vec!["pip".to_string(), "install".to_string(), "-U".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Runner executable.
    pub program: String,

    /// Flag that precedes the transient config file path.
    pub config_flag: String,

    /// Directory for transient config files. System temp dir when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            program: "pangeo-forge-runner".to_string(),
            config_flag: "-f".to_string(),
            scratch_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Environment and package listings.
    pub listing_timeout_secs: u64,

    pub install_timeout_secs: u64,

    /// Unset waits for the runner however long the job takes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runner_timeout_secs: Option<u64>,

    /// Truncate captured listing and installer output beyond this many bytes.
    /// Runner stdout is always kept whole.
    pub output_limit_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            listing_timeout_secs: 2 * 60,
            install_timeout_secs: 30 * 60,
            runner_timeout_secs: None,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl LimitsConfig {
    pub fn listing_timeout(&self) -> Duration {
        Duration::from_secs(self.listing_timeout_secs)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    pub fn runner_timeout(&self) -> Option<Duration> {
        self.runner_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            default_env: "notebook".to_string(),
            known_envs: Vec::new(),
            env_manager: EnvManagerConfig::default(),
            runner: RunnerConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_env.trim().is_empty() {
            return Err(anyhow!("default_env must be non-empty"));
        }
        if self.known_envs.iter().any(|env| env.trim().is_empty()) {
            return Err(anyhow!("known_envs must not contain empty names"));
        }
        if self.env_manager.program.trim().is_empty() {
            return Err(anyhow!("env_manager.program must be non-empty"));
        }
        if self.env_manager.installer.is_empty() || self.env_manager.installer[0].trim().is_empty()
        {
            return Err(anyhow!("env_manager.installer must be a non-empty array"));
        }
        if self.runner.program.trim().is_empty() {
            return Err(anyhow!("runner.program must be non-empty"));
        }
        if self.runner.config_flag.trim().is_empty() {
            return Err(anyhow!("runner.config_flag must be non-empty"));
        }
        if self.limits.listing_timeout_secs == 0 {
            return Err(anyhow!("limits.listing_timeout_secs must be > 0"));
        }
        if self.limits.install_timeout_secs == 0 {
            return Err(anyhow!("limits.install_timeout_secs must be > 0"));
        }
        if self.limits.runner_timeout_secs == Some(0) {
            return Err(anyhow!("limits.runner_timeout_secs must be > 0"));
        }
        if self.limits.output_limit_bytes == 0 {
            return Err(anyhow!("limits.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ServiceConfig::default()`.
pub fn load_config(path: &Path) -> Result<ServiceConfig> {
    if !path.exists() {
        let cfg = ServiceConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ServiceConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ServiceConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
