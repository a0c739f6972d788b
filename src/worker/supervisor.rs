//! Worker supervision.
//!
//! # Responsibilities
//! - Wait for the dependency, then launch the subprocess
//! - Forward the first termination signal and wait for the subprocess
//! - Restart the subprocess on source changes
//! - Report the subprocess exit status as the manager's own
//!
//! # Design Decisions
//! - One owned child handle and one `select!` loop; no shared state
//! - The drain latch is one-shot: repeated signals never re-enter shutdown
//! - Termination wins over restart: a signal during a restart's stop turns
//!   it into a drain and nothing is relaunched
//! - Without a grace period the manager waits for the child indefinitely
//! - A live child is never dropped silently: error paths send SIGTERM, not
//!   SIGKILL

use std::ops::{Deref, DerefMut};
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::config::{DependencyConfig, WorkerConfig};
use crate::error::WorkerError;
use crate::lifecycle::{DrainLatch, TerminationSignal};
use crate::worker::dependency::wait_for_dependency;
use crate::worker::launch::{LaunchPlan, Role};
use crate::worker::state::{WorkerState, WorkerStatus};

/// Owns and supervises the worker subprocess.
pub struct WorkerManager {
    plan: LaunchPlan,
    dependency: Option<DependencyConfig>,
    grace_period: Option<Duration>,
    latch: DrainLatch,
    status: watch::Sender<WorkerStatus>,
}

impl WorkerManager {
    /// Resolve the launch plan (the `Starting` phase).
    pub fn new<F>(config: &WorkerConfig, env: F) -> Result<Self, WorkerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let plan = LaunchPlan::resolve(config, &env)?;
        let (status, _) = watch::channel(WorkerStatus::default());

        tracing::info!(
            role = %plan.role,
            program = %plan.program,
            args = ?plan.args,
            "Worker plan resolved"
        );

        Ok(Self {
            plan,
            dependency: config.dependency.clone(),
            grace_period: config.grace_period_secs.map(Duration::from_secs),
            latch: DrainLatch::new(),
            status,
        })
    }

    pub fn role(&self) -> Role {
        self.plan.role
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<WorkerStatus> {
        self.status.subscribe()
    }

    /// Supervise until the subprocess is gone. Returns the exit code to use
    /// for this process.
    ///
    /// `changes` is only honored for [`Role::Worker`].
    pub async fn run(
        self,
        mut signals: mpsc::UnboundedReceiver<TerminationSignal>,
        changes: Option<mpsc::Receiver<()>>,
    ) -> Result<i32, WorkerError> {
        let mut changes = match self.plan.role {
            Role::Worker => changes,
            Role::Migrate => None,
        };

        if let Some(dependency) = &self.dependency {
            self.publish(WorkerState::WaitingForDependency, None, None);
            tokio::select! {
                _ = wait_for_dependency(&dependency.address, dependency.retry_interval()) => {}
                signal = next_signal(&mut signals) => {
                    self.latch.begin();
                    tracing::info!(signal = %signal, "Terminated while waiting for dependency");
                    self.publish(WorkerState::Terminated, None, Some(0));
                    return Ok(0);
                }
            }
        }

        let mut child = self.launch()?;
        loop {
            tokio::select! {
                status = child.wait() => {
                    let code = exit_code(status.map_err(WorkerError::Wait)?);
                    tracing::info!(code, "Worker process exited");
                    return Ok(self.terminated(code));
                }
                signal = next_signal(&mut signals) => {
                    self.latch.begin();
                    tracing::info!(signal = %signal, pid = ?child.id(), "Draining worker");
                    self.publish(WorkerState::Draining, child.id(), None);
                    let code = exit_code(self.stop(&mut child, &mut signals).await?);
                    tracing::info!(code, "Worker drained");
                    return Ok(self.terminated(code));
                }
                () = next_change(&mut changes) => {
                    tracing::info!(pid = ?child.id(), "Restarting worker");
                    let status = self.stop(&mut child, &mut signals).await?;
                    if self.latch.is_draining() {
                        let code = exit_code(status);
                        tracing::info!(code, "Worker drained during restart");
                        return Ok(self.terminated(code));
                    }
                    child = self.launch()?;
                }
            }
        }
    }

    fn launch(&self) -> Result<Supervised, WorkerError> {
        let child = Supervised(self.plan.spawn()?);
        tracing::info!(pid = ?child.id(), role = %self.plan.role, "Worker process started");
        self.publish(WorkerState::Running, child.id(), None);
        Ok(child)
    }

    /// Send SIGTERM and wait for the child, honoring the grace period.
    ///
    /// The first signal seen here sets the drain latch; later ones are
    /// ignored.
    async fn stop(
        &self,
        child: &mut Child,
        signals: &mut mpsc::UnboundedReceiver<TerminationSignal>,
    ) -> Result<ExitStatus, WorkerError> {
        forward_sigterm(child)?;

        let mut deadline = self.grace_period.map(|grace| Instant::now() + grace);
        loop {
            tokio::select! {
                status = child.wait() => return status.map_err(WorkerError::Wait),
                signal = next_signal(signals) => {
                    if self.latch.begin() {
                        tracing::info!(signal = %signal, "Termination requested during restart");
                        self.publish(WorkerState::Draining, child.id(), None);
                    } else {
                        tracing::debug!(signal = %signal, "SignalDuringDrain ignored");
                    }
                }
                _ = sleep_until(deadline) => {
                    tracing::warn!(
                        pid = ?child.id(),
                        grace_period_secs = self.grace_period.map(|g| g.as_secs()),
                        "Grace period exceeded, killing worker"
                    );
                    child.start_kill().map_err(WorkerError::Signal)?;
                    deadline = None;
                }
            }
        }
    }

    fn terminated(&self, code: i32) -> i32 {
        self.publish(WorkerState::Terminated, None, Some(code));
        code
    }

    fn publish(&self, state: WorkerState, pid: Option<u32>, exit_code: Option<i32>) {
        tracing::debug!(state = %state, pid = ?pid, "Worker state changed");
        self.status.send_replace(WorkerStatus { state, pid, exit_code });
    }
}

/// A running child that receives SIGTERM if dropped before it is reaped.
struct Supervised(Child);

impl Deref for Supervised {
    type Target = Child;

    fn deref(&self) -> &Child {
        &self.0
    }
}

impl DerefMut for Supervised {
    fn deref_mut(&mut self) -> &mut Child {
        &mut self.0
    }
}

impl Drop for Supervised {
    fn drop(&mut self) {
        if let Err(e) = forward_sigterm(&mut self.0) {
            tracing::warn!(error = %e, "Failed to signal abandoned worker");
        }
    }
}

/// Next termination signal. Pends forever once the channel is closed.
async fn next_signal(
    signals: &mut mpsc::UnboundedReceiver<TerminationSignal>,
) -> TerminationSignal {
    match signals.recv().await {
        Some(signal) => signal,
        None => std::future::pending().await,
    }
}

/// Next debounced source change. Pends forever without a watcher.
async fn next_change(changes: &mut Option<mpsc::Receiver<()>>) {
    if let Some(rx) = changes {
        if rx.recv().await.is_some() {
            return;
        }
    }
    std::future::pending().await
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Ask the child to shut down gracefully.
fn forward_sigterm(child: &mut Child) -> Result<(), WorkerError> {
    let Some(pid) = child.id() else {
        // Already reaped.
        return Ok(());
    };
    tracing::info!(pid, "Sending SIGTERM to worker");

    #[cfg(unix)]
    {
        let pid = libc::pid_t::try_from(pid).map_err(|e| {
            WorkerError::Signal(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;
        // SAFETY: kill(2) has no memory-safety preconditions.
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc != 0 {
            return Err(WorkerError::Signal(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        child.start_kill().map_err(WorkerError::Signal)
    }
}

/// Shell-style exit code: the status code, or 128 + signal number.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    const TEN_SECS: Duration = Duration::from_secs(10);

    fn sh(script: &str) -> WorkerConfig {
        WorkerConfig {
            command: vec!["/bin/sh".into(), "-c".into(), script.into()],
            ..WorkerConfig::default()
        }
    }

    #[tokio::test]
    async fn child_exit_code_is_propagated() {
        let manager = WorkerManager::new(&sh("exit 7"), |_| None).unwrap();
        let mut status = manager.subscribe();
        let (_tx, signals) = mpsc::unbounded_channel();

        let code = manager.run(signals, None).await.unwrap();
        assert_eq!(code, 7);
        let last = *status.borrow_and_update();
        assert_eq!(last.state, WorkerState::Terminated);
        assert_eq!(last.exit_code, Some(7));
    }

    #[tokio::test]
    async fn sigterm_death_maps_to_128_plus_signal() {
        let manager = WorkerManager::new(&sh("exec sleep 30"), |_| None).unwrap();
        let mut status = manager.subscribe();
        let (tx, signals) = mpsc::unbounded_channel();
        let run = tokio::spawn(manager.run(signals, None));

        status.wait_for(|s| s.state == WorkerState::Running).await.unwrap();
        tx.send(TerminationSignal::Terminate).unwrap();

        let code = tokio::time::timeout(TEN_SECS, run).await.unwrap().unwrap().unwrap();
        assert_eq!(code, 128 + libc::SIGTERM);
    }

    #[tokio::test]
    async fn grace_period_kills_stubborn_child() {
        let mut config = sh("trap '' TERM; while true; do sleep 0.1; done");
        config.grace_period_secs = Some(1);
        let manager = WorkerManager::new(&config, |_| None).unwrap();
        let mut status = manager.subscribe();
        let (tx, signals) = mpsc::unbounded_channel();
        let run = tokio::spawn(manager.run(signals, None));

        status.wait_for(|s| s.state == WorkerState::Running).await.unwrap();
        tx.send(TerminationSignal::Terminate).unwrap();

        let code = tokio::time::timeout(TEN_SECS, run).await.unwrap().unwrap().unwrap();
        assert_eq!(code, 128 + libc::SIGKILL);
    }

    #[test]
    fn migrate_role_without_command_fails_early() {
        let config = sh("true");
        let role = |k: &str| (k == "CONTAINER_ROLE").then(|| "migrate".to_string());
        let err = WorkerManager::new(&config, role);
        assert!(matches!(err, Err(WorkerError::EmptyCommand { role: "migrate" })));
    }

    #[tokio::test]
    async fn dropped_child_gets_sigterm_not_sigkill() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let mut config = sh(r#"trap 'echo term > "$MARKER"; exit 0' TERM
echo up > "$MARKER"
while true; do sleep 0.1; done"#);
        config.env.insert("MARKER".into(), marker.to_string_lossy().into_owned());
        let manager = WorkerManager::new(&config, |_| None).unwrap();

        let child = manager.launch().unwrap();
        let read = || std::fs::read_to_string(&marker).unwrap_or_default();
        tokio::time::timeout(TEN_SECS, async {
            while read().trim() != "up" {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        drop(child);
        // Only a catchable signal lets the trap run.
        tokio::time::timeout(TEN_SECS, async {
            while read().trim() != "term" {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
    }
}
