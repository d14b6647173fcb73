//! envrun server - HTTP front-end for install-then-run jobs.

mod error;
mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use envrun::io::config::{DEFAULT_CONFIG_FILE, load_config};
use envrun::io::process::SystemCommandRunner;
use tracing::info;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "envrun-server")]
#[command(about = "HTTP front-end that installs packages and runs jobs")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Service config (TOML); defaults apply when missing
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("envrun=info".parse()?)
                .add_directive("envrun_server=info".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let config = load_config(&args.config)?;
    info!(
        config = %args.config.display(),
        default_env = %config.default_env,
        env_manager = %config.env_manager.program,
        runner = %config.runner.program,
        "loaded config"
    );

    let state = AppState::new(config, Arc::new(SystemCommandRunner));
    let app = routes::app(state);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
