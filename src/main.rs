//! Edge router binary.
//!
//! ```text
//! edge-router proxy  [--config FILE]   serve the route table until SIGTERM
//! edge-router worker [--config FILE]   supervise the worker subprocess
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use edge_router::config::loader::parse_config;
use edge_router::config::{load_config, ConfigError, ObservabilityConfig, RouterConfig};
use edge_router::lifecycle::startup::{run_proxy, run_worker};
use edge_router::observability::logging::init_logging;

const DEFAULT_CONFIG: &str = "edge-router.toml";

#[derive(Parser)]
#[command(name = "edge-router", version)]
#[command(about = "Path-based edge reverse proxy and worker lifecycle manager", long_about = None)]
struct Cli {
    /// Configuration file. Defaults to ./edge-router.toml when present.
    #[arg(short, long, global = true, env = "EDGE_ROUTER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reverse proxy
    Proxy,
    /// Run the worker lifecycle manager
    Worker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match resolve_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            init_logging(&ObservabilityConfig::default());
            tracing::error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config.observability);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "edge-router starting");

    match cli.command {
        Command::Proxy => match run_proxy(config).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, "Proxy failed");
                ExitCode::FAILURE
            }
        },
        Command::Worker => match run_worker(config).await {
            Ok(code) => u8::try_from(code).map(ExitCode::from).unwrap_or(ExitCode::FAILURE),
            Err(e) => {
                tracing::error!(error = %e, "Worker manager failed");
                ExitCode::FAILURE
            }
        },
    }
}

/// Explicit path must load; the default path is optional.
fn resolve_config(path: Option<&Path>) -> Result<RouterConfig, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None if Path::new(DEFAULT_CONFIG).exists() => load_config(Path::new(DEFAULT_CONFIG)),
        None => parse_config("", |key| std::env::var(key).ok()),
    }
}
