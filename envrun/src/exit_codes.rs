//! Stable exit codes for `envrun` CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid request or config, unknown environment, or an internal failure.
pub const INVALID: i32 = 1;
/// The package installer exited non-zero; the runner was not started.
pub const INSTALL_FAILED: i32 = 2;
/// The runner exited non-zero.
pub const RUNNER_FAILED: i32 = 3;
