//! Worker lifecycle subsystem.
//!
//! # Data Flow
//! ```text
//! Starting (launch.rs):
//!     Role from environment → command → merged environment
//!
//! WaitingForDependency (dependency.rs):
//!     TCP connect every retry interval until it succeeds
//!
//! Running / Draining / Terminated (supervisor.rs):
//!     spawn → select { child exit, termination signal, source change }
//!
//! Source changes (watcher.rs):
//!     notify events → extension filter → debounce → restart
//! ```

pub mod dependency;
pub mod launch;
pub mod state;
pub mod supervisor;
pub mod watcher;

pub use launch::{LaunchPlan, Role};
pub use state::{WorkerState, WorkerStatus};
pub use supervisor::WorkerManager;
pub use watcher::SourceWatcher;
