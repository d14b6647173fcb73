//! Install-then-run job front-end.
//!
//! Runs a job description from a file (or stdin) against the configured
//! environment manager and runner, printing the JSON response on stdout.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;

use envrun::core::request::JobRequest;
use envrun::exit_codes;
use envrun::io::config::{DEFAULT_CONFIG_FILE, ServiceConfig, load_config, write_config};
use envrun::io::process::SystemCommandRunner;
use envrun::job::{environment_snapshot, known_environments, run_job};

#[derive(Parser)]
#[command(
    name = "envrun",
    version,
    about = "Install packages into an environment, then run a job runner"
)]
struct Cli {
    /// Path to the service config (TOML). Defaults apply when missing.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a job request (JSON) and print the response.
    Run {
        /// Request file, or `-` for stdin.
        request: PathBuf,
    },
    /// Print the environments jobs may target.
    Envs,
    /// Print the installed packages of an environment.
    Snapshot {
        /// Environment name.
        env: String,
    },
    /// Write a config file with default values.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    envrun::logging::init("warn");
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { request } => cmd_run(&cli.config, &request),
        Command::Envs => cmd_envs(&cli.config),
        Command::Snapshot { env } => cmd_snapshot(&cli.config, &env),
        Command::InitConfig { force } => cmd_init_config(&cli.config, force),
    }
}

fn cmd_run(config_path: &Path, request_path: &Path) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let raw = read_request(request_path)?;
    let request: JobRequest = serde_json::from_str(&raw).context("parse job request")?;

    match run_job(&SystemCommandRunner, &cfg, &request) {
        Ok(response) => {
            print_json(&response)?;
            Ok(exit_codes::OK)
        }
        Err(err) => {
            print_json(&err.body())?;
            eprintln!("{}: {}", err.kind(), err.body().message.trim_end());
            Ok(err.exit_code())
        }
    }
}

fn cmd_envs(config_path: &Path) -> Result<i32> {
    let cfg = load_config(config_path)?;
    for env in known_environments(&SystemCommandRunner, &cfg)? {
        println!("{env}");
    }
    Ok(exit_codes::OK)
}

fn cmd_snapshot(config_path: &Path, env: &str) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let snapshot = environment_snapshot(&SystemCommandRunner, &cfg, env)?;
    print_json(snapshot.records())?;
    Ok(exit_codes::OK)
}

fn cmd_init_config(config_path: &Path, force: bool) -> Result<i32> {
    if !force && config_path.exists() {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    write_config(config_path, &ServiceConfig::default())?;
    println!("{}", config_path.display());
    Ok(exit_codes::OK)
}

fn read_request(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read request from stdin")?;
        return Ok(buf);
    }
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

/// Print `value` as pretty JSON with a trailing newline.
fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run() {
        let cli = Cli::parse_from(["envrun", "run", "job.json"]);
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
        assert!(matches!(cli.command, Command::Run { request } if request == Path::new("job.json")));
    }

    #[test]
    fn parse_global_config_after_subcommand() {
        let cli = Cli::parse_from(["envrun", "envs", "--config", "/etc/envrun.toml"]);
        assert_eq!(cli.config, PathBuf::from("/etc/envrun.toml"));
        assert!(matches!(cli.command, Command::Envs));
    }

    #[test]
    fn parse_init_config_force() {
        let cli = Cli::parse_from(["envrun", "init-config", "--force"]);
        assert!(matches!(cli.command, Command::InitConfig { force: true }));
    }
}
