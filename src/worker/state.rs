//! Observable worker lifecycle state.

use std::fmt;

/// Lifecycle of the supervised process.
///
/// ```text
/// Starting → WaitingForDependency → Running → Draining → Terminated
/// ```
/// `WaitingForDependency` is skipped when no dependency is configured.
/// A process exiting on its own goes from `Running` straight to `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    WaitingForDependency,
    Running,
    Draining,
    Terminated,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Starting => "starting",
            WorkerState::WaitingForDependency => "waiting_for_dependency",
            WorkerState::Running => "running",
            WorkerState::Draining => "draining",
            WorkerState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Snapshot published on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStatus {
    pub state: WorkerState,
    /// Current subprocess, if one is running.
    pub pid: Option<u32>,
    /// Set once `Terminated`.
    pub exit_code: Option<i32>,
}

impl WorkerStatus {
    pub fn new(state: WorkerState) -> Self {
        Self {
            state,
            pid: None,
            exit_code: None,
        }
    }
}

impl Default for WorkerStatus {
    fn default() -> Self {
        Self::new(WorkerState::Starting)
    }
}
