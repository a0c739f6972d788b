//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Detect duplicate route names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RouterConfig → Result<(), Vec<ValidationError>>
//! - Route pattern checks (catch-all, regex syntax) live in route compilation

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{RouterConfig, WorkerConfig};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address '{0}' is not a socket address")]
    BindAddress(String),

    #[error("listener.max_connections must be greater than 0")]
    MaxConnections,

    #[error("{0} must be greater than 0")]
    ZeroTimeout(String),

    #[error("route table is empty")]
    NoRoutes,

    #[error("route name '{0}' is declared more than once")]
    DuplicateRoute(String),

    #[error("route '{0}' has neither an upstream nor a redirect")]
    MissingUpstream(String),

    #[error("reserved path '{0}' must start with '/'")]
    ReservedPath(String),

    #[error("observability.log_format '{0}' is not 'pretty' or 'json'")]
    LogFormat(String),

    #[error("worker.{0} must not be an empty string")]
    EmptyWorkerField(&'static str),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &RouterConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::MaxConnections);
    }

    for (field, value) in [
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("timeouts.read_secs", config.timeouts.read_secs),
        ("timeouts.write_secs", config.timeouts.write_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroTimeout(field.to_string()));
        }
    }

    if config.routes.is_empty() {
        errors.push(ValidationError::NoRoutes);
    }

    let mut names = HashSet::new();
    for route in &config.routes {
        if !names.insert(route.name.as_str()) {
            errors.push(ValidationError::DuplicateRoute(route.name.clone()));
        }
        if route.redirect.is_none() && route.upstream.trim().is_empty() {
            errors.push(ValidationError::MissingUpstream(route.name.clone()));
        }
        for (field, value) in [
            ("connect_timeout_secs", route.connect_timeout_secs),
            ("read_timeout_secs", route.read_timeout_secs),
            ("write_timeout_secs", route.write_timeout_secs),
        ] {
            if value == Some(0) {
                let field = format!("routes.{}.{}", route.name, field);
                errors.push(ValidationError::ZeroTimeout(field));
            }
        }
    }

    for path in [&config.reserved.health_path, &config.reserved.robots_path] {
        if !path.starts_with('/') {
            errors.push(ValidationError::ReservedPath(path.clone()));
        }
    }

    if !matches!(config.observability.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::LogFormat(config.observability.log_format.clone()));
    }

    validate_worker(&config.worker, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_worker(worker: &WorkerConfig, errors: &mut Vec<ValidationError>) {
    if worker.role_env.is_empty() {
        errors.push(ValidationError::EmptyWorkerField("role_env"));
    }
    if let Some(dependency) = &worker.dependency {
        if dependency.address.is_empty() {
            errors.push(ValidationError::EmptyWorkerField("dependency.address"));
        }
        if dependency.retry_interval_ms == 0 {
            errors.push(ValidationError::ZeroTimeout("worker.dependency.retry_interval_ms".into()));
        }
    }
}
