//! Invocation of the external runner executable.

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::request::RunnerInvocation;
use crate::io::config::ServiceConfig;
use crate::io::process::{CommandOutput, CommandRunner, CommandSpec};
use crate::io::transient::TransientConfigFile;

/// Run `<runner.program> <cmd..> <config_flag> <config path>`.
///
/// The config payload lives in a transient file that is removed when this
/// returns, whatever the outcome. A non-zero exit is returned as output.
#[instrument(skip_all, fields(program = %cfg.runner.program, args = invocation.cmd.len()))]
pub fn run_runner<R: CommandRunner + ?Sized>(
    runner: &R,
    cfg: &ServiceConfig,
    invocation: &RunnerInvocation,
) -> Result<CommandOutput> {
    let config_file =
        TransientConfigFile::create(cfg.runner.scratch_dir.as_deref(), &invocation.config)?;

    let mut args = invocation.cmd.clone();
    args.push(cfg.runner.config_flag.clone());
    args.push(config_file.path().to_string_lossy().into_owned());
    let spec = CommandSpec::new(&cfg.runner.program, args)
        .with_timeout(cfg.limits.runner_timeout())
        .without_output_limit();

    info!(command = %spec, "starting runner");
    let output = runner.run(&spec).context("run runner")?;
    if output.success() {
        debug!(stdout_bytes = output.stdout.len(), "runner completed");
    } else {
        warn!(exit_code = ?output.exit_code, timed_out = output.timed_out, "runner failed");
    }
    Ok(output)
}
