//! Install-then-run job orchestration.
//!
//! A job optionally installs packages into a named environment, records what
//! changed, then runs an external runner executable with a transient config
//! file and relays its output. The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure logic (snapshots, diffs, request shapes, validation).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, processes, environment
//!   manager, transient files). Process execution sits behind
//!   [`io::process::CommandRunner`] so orchestration can be tested without
//!   spawning anything.
//!
//! [`job`] coordinates the two to implement a request.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod job;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
