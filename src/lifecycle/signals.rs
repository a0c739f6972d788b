//! OS signal handling.
//!
//! # Responsibilities
//! - Register SIGTERM and SIGINT handlers
//! - Translate them into [`TerminationSignal`] events on a channel
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Every delivery is forwarded; deduplication is the consumer's job
//! - Non-unix targets only see Ctrl+C

use std::fmt;
use std::io;

use tokio::sync::mpsc;

use crate::lifecycle::Shutdown;

/// A request from the environment to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    Terminate,
    Interrupt,
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationSignal::Terminate => write!(f, "SIGTERM"),
            TerminationSignal::Interrupt => write!(f, "SIGINT"),
        }
    }
}

/// Install the handlers and return the stream of deliveries.
///
/// Must be called from within a Tokio runtime. Handlers stay installed for
/// the life of the process.
#[cfg(unix)]
pub fn termination_signals() -> io::Result<mpsc::UnboundedReceiver<TerminationSignal>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                Some(()) = sigterm.recv() => TerminationSignal::Terminate,
                Some(()) = sigint.recv() => TerminationSignal::Interrupt,
                else => break,
            };
            tracing::info!(signal = %received, "Termination signal received");
            if tx.send(received).is_err() {
                break;
            }
        }
    });

    Ok(rx)
}

#[cfg(not(unix))]
pub fn termination_signals() -> io::Result<mpsc::UnboundedReceiver<TerminationSignal>> {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!(signal = %TerminationSignal::Interrupt, "Termination signal received");
            if tx.send(TerminationSignal::Interrupt).is_err() {
                break;
            }
        }
    });

    Ok(rx)
}

/// Trigger `shutdown` on the first signal. Later signals are logged only.
pub fn shutdown_on_signal(
    mut signals: mpsc::UnboundedReceiver<TerminationSignal>,
    shutdown: Shutdown,
) {
    tokio::spawn(async move {
        if signals.recv().await.is_some() {
            shutdown.trigger();
        }
        while let Some(signal) = signals.recv().await {
            tracing::debug!(signal = %signal, "Already shutting down");
        }
    });
}
