//! Helpers for running child processes with timeouts and bounded output.
//!
//! [`CommandRunner`] is the seam between orchestration and the operating
//! system. Tests swap in scripted runners that never spawn anything.

use std::fmt;
use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;

/// A fully described external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<Vec<u8>>,
    /// `None` waits for the command however long it takes.
    pub timeout: Option<Duration>,
    pub output_limit_bytes: usize,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
            timeout: Some(DEFAULT_TIMEOUT),
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }

    pub fn with_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.timeout = timeout.into();
        self
    }

    pub fn with_output_limit(mut self, output_limit_bytes: usize) -> Self {
        self.output_limit_bytes = output_limit_bytes;
        self
    }

    /// Keep all output in memory.
    pub fn without_output_limit(mut self) -> Self {
        self.output_limit_bytes = usize::MAX;
        self
    }

    pub fn with_stdin(mut self, stdin: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured child process output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the child was killed by a signal (including on timeout).
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    pub fn stdout_truncated_notice(&self, label: &str) -> String {
        if self.stdout_truncated > 0 {
            format!(
                "\n[{label} stdout truncated {} bytes]\n",
                self.stdout_truncated
            )
        } else {
            String::new()
        }
    }

    pub fn stderr_truncated_notice(&self, label: &str) -> String {
        if self.stderr_truncated > 0 {
            format!(
                "\n[{label} stderr truncated {} bytes]\n",
                self.stderr_truncated
            )
        } else {
            String::new()
        }
    }

    /// Diagnostic text for a failed command.
    ///
    /// Stderr verbatim; stdout when stderr is blank. Truncation and timeouts
    /// are appended as bracketed notices.
    pub fn diagnostics(&self, label: &str) -> String {
        let mut buf = if self.stderr.iter().all(u8::is_ascii_whitespace) {
            let mut out = self.stdout_text();
            out.push_str(&self.stdout_truncated_notice(label));
            out
        } else {
            let mut err = self.stderr_text();
            err.push_str(&self.stderr_truncated_notice(label));
            err
        };
        if self.timed_out {
            buf.push_str(&format!("\n[{label} timed out]\n"));
        } else if buf.trim().is_empty() {
            buf = match self.exit_code {
                Some(code) => format!("{label} exited with status {code}"),
                None => format!("{label} was terminated by a signal"),
            };
        }
        buf
    }
}

/// Executes external commands on behalf of the orchestrator.
pub trait CommandRunner {
    /// Run `spec` to completion. A non-zero exit is reported in the output,
    /// not as an error; errors mean the command could not be run at all.
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runner that spawns real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    #[instrument(skip_all, fields(program = %spec.program))]
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        run_command_with_timeout(
            cmd,
            spec.stdin.as_deref(),
            spec.timeout,
            spec.output_limit_bytes,
        )
        .with_context(|| format!("run `{spec}`"))
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
///
/// On unix the child leads its own process group and a timeout kills the whole group, so
/// grandchildren neither outlive the command nor keep its pipes open.
#[instrument(skip_all, fields(timeout = ?timeout, output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Option<Duration>,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        // The child may exit without reading its input.
        if let Err(e) = child_stdin.write_all(input) {
            warn!(err = %e, "failed to write stdin");
        }
    }

    let mut timed_out = false;
    let status = match timeout {
        Some(timeout) => match child.wait_timeout(timeout).context("wait for command")? {
            Some(status) => status,
            None => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "command timed out, killing"
                );
                timed_out = true;
                kill_process_tree(&mut child)?;
                child.wait().context("wait command after kill")?
            }
        },
        None => child.wait().context("wait for command")?,
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        exit_code: if timed_out { None } else { status.code() },
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// Kill the child and everything in its process group.
#[cfg(unix)]
fn kill_process_tree(child: &Child) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = i32::try_from(child.id()).context("child pid out of range")?;
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        // The group is already gone.
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e).context("kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_tree(child: &mut Child) -> Result<()> {
    child.kill().context("kill command")
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh", ["-c", script]).with_timeout(Duration::from_secs(10))
    }

    #[test]
    fn captures_exit_code_and_streams() {
        let output = SystemCommandRunner
            .run(&sh("echo out; echo err >&2; exit 3"))
            .expect("run");

        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
        assert_eq!(output.stdout_text(), "out\n");
        assert_eq!(output.stderr_text(), "err\n");
        assert_eq!(output.diagnostics("installer"), "err\n");
    }

    #[test]
    fn feeds_stdin() {
        let spec = CommandSpec::new("cat", Vec::<String>::new())
            .with_timeout(Duration::from_secs(10))
            .with_stdin("piped input");
        let output = SystemCommandRunner.run(&spec).expect("run");

        assert!(output.success());
        assert_eq!(output.stdout_text(), "piped input");
    }

    #[test]
    fn truncates_output_beyond_limit() {
        let output = SystemCommandRunner
            .run(&sh("printf 0123456789").with_output_limit(4))
            .expect("run");

        assert_eq!(output.stdout, b"0123");
        assert_eq!(output.stdout_truncated, 6);
    }

    #[test]
    fn kills_on_timeout() {
        let output = SystemCommandRunner
            .run(&sh("exec sleep 5").with_timeout(Duration::from_millis(100)))
            .expect("run");

        assert!(output.timed_out);
        assert!(!output.success());
        assert!(output.diagnostics("runner").contains("[runner timed out]"));
    }

    #[test]
    fn timeout_kills_grandchildren() {
        let started = Instant::now();
        let output = SystemCommandRunner
            .run(&sh("sleep 3; true").with_timeout(Duration::from_millis(200)))
            .expect("run");

        assert!(output.timed_out);
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "waited {:?} for the killed command",
            started.elapsed()
        );
    }

    #[test]
    fn no_timeout_waits_for_exit() {
        let output = SystemCommandRunner
            .run(&sh("sleep 0.2; echo done").with_timeout(None))
            .expect("run");

        assert!(output.success());
        assert_eq!(output.stdout_text(), "done\n");
    }

    #[test]
    fn unbounded_capture_keeps_everything() {
        let output = SystemCommandRunner
            .run(&sh("head -c 1500000 /dev/zero | tr '\\0' a").without_output_limit())
            .expect("run");

        assert_eq!(output.stdout.len(), 1_500_000);
        assert_eq!(output.stdout_truncated, 0);
    }

    #[test]
    fn missing_program_is_an_error() {
        let spec = CommandSpec::new("envrun-definitely-not-installed", ["x"]);
        let err = SystemCommandRunner.run(&spec).unwrap_err();
        assert!(format!("{err:#}").contains("spawn command"));
    }

    #[test]
    fn diagnostics_fall_back_to_stdout_then_status() {
        let stdout_only = CommandOutput {
            exit_code: Some(1),
            stdout: b"ERROR: resolution failed".to_vec(),
            ..CommandOutput::default()
        };
        assert_eq!(
            stdout_only.diagnostics("installer"),
            "ERROR: resolution failed"
        );

        let silent = CommandOutput {
            exit_code: Some(2),
            ..CommandOutput::default()
        };
        assert_eq!(silent.diagnostics("runner"), "runner exited with status 2");
    }
}
