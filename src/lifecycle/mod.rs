//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Compile routes → Start listeners
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → TerminationSignal channel
//!
//! Shutdown (shutdown.rs):
//!     Proxy: first signal → broadcast → stop accepting → drain connections
//!     Worker: first signal → drain latch → forward SIGTERM → wait for child
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when ready)
//! - Shutdown is never re-entered

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{DrainLatch, Shutdown};
pub use signals::{termination_signals, TerminationSignal};
