//! Binary entry point: parses CLI flags, wires up structured logging, bootstraps the
//! `Application`, and serves it until a termination signal arrives. Grounded in the teacher's
//! `main.rs` (clap-derived args, `tracing_subscriber::fmt` initialization, graceful shutdown
//! via signal futures raced against the server future).

use std::net::SocketAddr;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vstats_hub::Application;

#[derive(Parser, Debug)]
#[command(name = "vstats-hub", about = "Centralized server-monitoring hub")]
struct Args {
    /// Path to the JSON configuration file. Falls back to `VSTATS_CONFIG_PATH`, then defaults.
    #[arg(long)]
    config: Option<String>,

    /// Path to the DuckDB database file. Falls back to `VSTATS_DB_PATH`, then `vstats.duckdb`.
    #[arg(long)]
    db_path: Option<String>,

    /// Address to bind the WebSocket server to.
    #[arg(long, default_value = "0.0.0.0:9000")]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let app = match Application::bootstrap(args.config.clone(), args.db_path).await {
        Ok(app) => app,
        Err(e) => {
            error!(error = %e, "failed to bootstrap hub");
            return std::process::ExitCode::FAILURE;
        }
    };

    info!("vstats hub bootstrapped");

    #[cfg(unix)]
    {
        tokio::select! {
            result = app.serve(args.bind) => {
                if let Err(e) = result {
                    error!(error = %e, "server exited with error");
                    return std::process::ExitCode::FAILURE;
                }
            }
            _ = wait_for_shutdown_signal() => {
                info!("shutdown signal received");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = app.serve(args.bind).await {
            error!(error = %e, "server exited with error");
            return std::process::ExitCode::FAILURE;
        }
    }

    std::process::ExitCode::SUCCESS
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}
