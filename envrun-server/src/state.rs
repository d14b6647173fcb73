//! Shared application state for the HTTP server.

use std::sync::Arc;

use envrun::io::config::ServiceConfig;
use envrun::io::process::CommandRunner;

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Loaded service configuration.
    pub config: Arc<ServiceConfig>,
    /// Executes the environment manager, installer and runner.
    pub runner: Arc<dyn CommandRunner + Send + Sync>,
}

impl AppState {
    pub fn new(config: ServiceConfig, runner: Arc<dyn CommandRunner + Send + Sync>) -> Self {
        Self {
            config: Arc::new(config),
            runner,
        }
    }
}
