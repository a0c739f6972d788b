//! Role selection and subprocess launch.
//!
//! # Responsibilities
//! - Read the role from the process environment
//! - Pick the command for that role
//! - Merge configured environment entries over the inherited environment
//!
//! # Design Decisions
//! - A missing role means `worker`
//! - Secrets are never configured here; they arrive through the inherited
//!   environment and pass through untouched

use std::collections::BTreeMap;
use std::fmt;
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::config::WorkerConfig;
use crate::error::WorkerError;

/// What the spawned process is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Long-running consumer.
    Worker,
    /// One-shot schema migration.
    Migrate,
}

impl Role {
    /// Parse the role selector. Unset or blank means [`Role::Worker`].
    pub fn from_env_value(value: Option<&str>) -> Result<Self, WorkerError> {
        match value.map(str::trim) {
            None | Some("") => Ok(Role::Worker),
            Some(v) if v.eq_ignore_ascii_case("worker") => Ok(Role::Worker),
            Some(v) if v.eq_ignore_ascii_case("migrate") => Ok(Role::Migrate),
            Some(other) => Err(WorkerError::UnknownRole(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Worker => "worker",
            Role::Migrate => "migrate",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved, ready-to-spawn command.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub role: Role,
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl LaunchPlan {
    /// Resolve the plan for the role named in the environment.
    ///
    /// `env` looks up process environment variables; passing a closure keeps
    /// resolution testable without touching the real environment.
    pub fn resolve<F>(config: &WorkerConfig, env: F) -> Result<Self, WorkerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let role = Role::from_env_value(env(&config.role_env).as_deref())?;
        let command = match role {
            Role::Worker => &config.command,
            Role::Migrate => &config.migrate_command,
        };

        let (program, args) = command
            .split_first()
            .ok_or(WorkerError::EmptyCommand { role: role.as_str() })?;
        if program.trim().is_empty() {
            return Err(WorkerError::EmptyCommand { role: role.as_str() });
        }

        Ok(Self {
            role,
            program: program.clone(),
            args: args.to_vec(),
            env: config.env.clone(),
        })
    }

    /// Start the subprocess with inherited stdio.
    ///
    /// The handle does not kill on drop; the supervisor owns shutdown.
    pub fn spawn(&self) -> Result<Child, WorkerError> {
        Command::new(&self.program)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| WorkerError::Spawn {
                program: self.program.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> WorkerConfig {
        WorkerConfig {
            command: vec!["celery".into(), "worker".into(), "-l".into(), "info".into()],
            migrate_command: vec!["manage".into(), "migrate".into()],
            env: BTreeMap::from([("QUEUE".to_string(), "default".to_string())]),
            ..WorkerConfig::default()
        }
    }

    fn role(value: &'static str) -> impl Fn(&str) -> Option<String> {
        move |key| (key == "CONTAINER_ROLE").then(|| value.to_string())
    }

    #[test]
    fn unset_role_runs_worker_command() {
        let plan = LaunchPlan::resolve(&config(), |_| None).unwrap();
        assert_eq!(plan.role, Role::Worker);
        assert_eq!(plan.program, "celery");
        assert_eq!(plan.args, ["worker", "-l", "info"]);
        assert_eq!(plan.env["QUEUE"], "default");
    }

    #[test]
    fn migrate_role_runs_migrate_command() {
        let plan = LaunchPlan::resolve(&config(), role("migrate")).unwrap();
        assert_eq!(plan.role, Role::Migrate);
        assert_eq!(plan.program, "manage");
        assert_eq!(plan.args, ["migrate"]);
    }

    #[test]
    fn unknown_role_is_rejected() {
        let err = LaunchPlan::resolve(&config(), role("web")).unwrap_err();
        assert!(matches!(err, WorkerError::UnknownRole(r) if r == "web"));
    }

    #[test]
    fn empty_command_for_role_is_rejected() {
        let mut config = config();
        config.migrate_command.clear();
        let err = LaunchPlan::resolve(&config, role("migrate")).unwrap_err();
        assert!(matches!(err, WorkerError::EmptyCommand { role: "migrate" }));
    }

    #[tokio::test]
    async fn spawn_failure_names_program() {
        let plan = LaunchPlan {
            role: Role::Worker,
            program: "/nonexistent/edge-router-test-binary".into(),
            args: vec![],
            env: BTreeMap::new(),
        };
        let err = plan.spawn().unwrap_err();
        assert!(err.to_string().contains("/nonexistent/edge-router-test-binary"));
    }
}
