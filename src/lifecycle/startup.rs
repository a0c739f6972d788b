//! Startup orchestration.
//!
//! # Responsibilities
//! - Compile the route table before binding anything
//! - Start the metrics exporter when enabled
//! - Bind the listener and serve until a termination signal
//! - Assemble and run the worker manager
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::io;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::RouterConfig;
use crate::error::WorkerError;
use crate::http::HttpServer;
use crate::lifecycle::signals::{shutdown_on_signal, termination_signals};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::routing::RouteTableError;
use crate::worker::{Role, SourceWatcher, WorkerManager};

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{0}")]
    Routes(#[from] RouteTableError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] io::Error),

    #[error("server error: {0}")]
    Server(#[source] io::Error),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// Run the proxy until SIGTERM/SIGINT, then drain.
pub async fn run_proxy(config: RouterConfig) -> Result<(), StartupError> {
    // Routes first: a malformed table never gets a listener.
    let server = HttpServer::new(config)?;
    let config = server.config();

    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        routes = config.routes.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let address = config.listener.bind_address.clone();
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| StartupError::Bind { address, source })?;

    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    shutdown_on_signal(termination_signals().map_err(StartupError::Signals)?, shutdown);

    server.run(listener, receiver).await.map_err(StartupError::Server)?;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Run the worker manager. Returns the exit code for this process.
pub async fn run_worker(config: RouterConfig) -> Result<i32, StartupError> {
    let manager = WorkerManager::new(&config.worker, |key| std::env::var(key).ok())?;

    // Handlers go in before anything can block, so no signal is lost.
    let signals = termination_signals().map_err(StartupError::Signals)?;

    let (_watcher, changes) = match (&config.worker.watch, manager.role()) {
        (Some(watch), Role::Worker) => {
            let (watcher, changes) = SourceWatcher::start(watch)?;
            (Some(watcher), Some(changes))
        }
        (Some(_), Role::Migrate) => {
            tracing::info!("Source watching disabled for the migrate role");
            (None, None)
        }
        (None, _) => (None, None),
    };

    let code = manager.run(signals, changes).await?;
    tracing::info!(code, "Worker manager finished");
    Ok(code)
}
