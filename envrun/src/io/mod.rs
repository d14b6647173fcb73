//! Side-effecting adapters: config files, child processes, environments.

pub mod config;
pub mod envs;
pub mod process;
pub mod runner;
pub mod transient;
