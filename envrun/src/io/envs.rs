//! Adapter for a conda-compatible environment manager.
//!
//! Lists environments, snapshots installed packages and runs the installer
//! inside a named environment. Every call goes through a [`CommandRunner`].

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{PackageRecord, PackageSnapshot};
use crate::io::config::ServiceConfig;
use crate::io::process::{CommandOutput, CommandRunner, CommandSpec};

/// Name conda gives its root prefix.
pub const ROOT_ENV_NAME: &str = "base";

pub struct EnvManager<'a, R: CommandRunner + ?Sized> {
    runner: &'a R,
    cfg: &'a ServiceConfig,
}

impl<'a, R: CommandRunner + ?Sized> EnvManager<'a, R> {
    pub fn new(runner: &'a R, cfg: &'a ServiceConfig) -> Self {
        Self { runner, cfg }
    }

    /// Environment names that requests may target.
    ///
    /// Uses `known_envs` from the config when set, otherwise asks the manager.
    pub fn known_envs(&self) -> Result<Vec<String>> {
        if !self.cfg.known_envs.is_empty() {
            return Ok(self.cfg.known_envs.clone());
        }
        self.list_envs()
    }

    /// `<program> env list --json`
    #[instrument(skip_all)]
    pub fn list_envs(&self) -> Result<Vec<String>> {
        let spec = self.listing_spec(["env", "list", "--json"]);
        let output = self.run_listing(&spec)?;
        let names = parse_env_list(&output.stdout_text())?;
        debug!(count = names.len(), "listed environments");
        Ok(names)
    }

    /// `<program> list -n <env> --json`
    #[instrument(skip(self))]
    pub fn snapshot(&self, env: &str) -> Result<PackageSnapshot> {
        let spec = self.listing_spec(["list", "-n", env, "--json"]);
        let output = self.run_listing(&spec)?;
        let snapshot = parse_package_list(&output.stdout_text())
            .with_context(|| format!("parse package listing for `{env}`"))?;
        debug!(packages = snapshot.len(), "captured snapshot");
        Ok(snapshot)
    }

    /// `<program> run -n <env> <installer..> <pkgs..>`
    ///
    /// A failing installer is returned as output, not as an error.
    #[instrument(skip(self, pkgs), fields(packages = pkgs.len()))]
    pub fn install(&self, env: &str, pkgs: &[String]) -> Result<CommandOutput> {
        let mut args = vec!["run".to_string(), "-n".to_string(), env.to_string()];
        args.extend(self.cfg.env_manager.installer.iter().cloned());
        args.extend(pkgs.iter().cloned());
        let spec = CommandSpec::new(&self.cfg.env_manager.program, args)
            .with_timeout(self.cfg.limits.install_timeout())
            .with_output_limit(self.cfg.limits.output_limit_bytes);

        info!(command = %spec, "running installer");
        let output = self.runner.run(&spec).context("run installer")?;
        if output.success() {
            info!("installer succeeded");
        } else {
            warn!(exit_code = ?output.exit_code, timed_out = output.timed_out, "installer failed");
        }
        Ok(output)
    }

    fn listing_spec<const N: usize>(&self, args: [&str; N]) -> CommandSpec {
        CommandSpec::new(&self.cfg.env_manager.program, args)
            .with_timeout(self.cfg.limits.listing_timeout())
            .with_output_limit(self.cfg.limits.output_limit_bytes)
    }

    fn run_listing(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let output = self
            .runner
            .run(spec)
            .with_context(|| format!("run `{spec}`"))?;
        if !output.success() {
            return Err(anyhow!(
                "`{spec}` failed: {}",
                output.diagnostics("listing").trim_end()
            ));
        }
        if output.stdout_truncated > 0 {
            return Err(anyhow!(
                "`{spec}` output exceeded {} bytes",
                spec.output_limit_bytes
            ));
        }
        Ok(output)
    }
}

#[derive(Deserialize)]
struct EnvListing {
    envs: Vec<String>,
}

#[derive(Deserialize)]
struct ListedPackage {
    name: String,
    version: String,
}

/// Parse `env list --json` output into environment names.
///
/// Prefixes under an `envs` directory are named after their directory; the
/// first prefix outside one is the root environment. Other unnamed prefixes
/// cannot be targeted by name and are skipped.
pub fn parse_env_list(json: &str) -> Result<Vec<String>> {
    let listing: EnvListing = serde_json::from_str(json).context("parse environment listing")?;
    let mut names: Vec<String> = Vec::new();
    let mut root_seen = false;
    for prefix in &listing.envs {
        let path = Path::new(prefix);
        let parent_is_envs = path
            .parent()
            .and_then(Path::file_name)
            .is_some_and(|name| name == "envs");
        let name = if parent_is_envs {
            path.file_name().map(|name| name.to_string_lossy().into_owned())
        } else if !root_seen {
            root_seen = true;
            Some(ROOT_ENV_NAME.to_string())
        } else {
            None
        };
        match name {
            Some(name) if !names.contains(&name) => names.push(name),
            Some(_) => {}
            None => debug!(prefix = %prefix, "skipping unnamed environment"),
        }
    }
    Ok(names)
}

/// Parse `list --json` output into a snapshot. Extra fields are ignored.
pub fn parse_package_list(json: &str) -> Result<PackageSnapshot> {
    let packages: Vec<ListedPackage> =
        serde_json::from_str(json).context("parse package listing")?;
    Ok(packages
        .into_iter()
        .map(|pkg| PackageRecord::new(pkg.name, pkg.version))
        .collect())
}
