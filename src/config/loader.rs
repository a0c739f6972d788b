//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::{DependencyConfig, RouterConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Overrides `listener.bind_address`.
pub const ENV_BIND: &str = "EDGE_ROUTER_BIND";
/// Overrides `worker.dependency.address`.
pub const ENV_DEPENDENCY: &str = "EDGE_ROUTER_DEPENDENCY";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<RouterConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content, |key| std::env::var(key).ok())
}

/// Parse, apply environment overrides, validate.
///
/// `env` is injected so overrides can be exercised without touching the
/// process environment.
pub fn parse_config<F>(content: &str, env: F) -> Result<RouterConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config: RouterConfig = toml::from_str(content)?;
    apply_env_overrides(&mut config, env);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

fn apply_env_overrides<F>(config: &mut RouterConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(bind) = env(ENV_BIND) {
        tracing::debug!(bind_address = %bind, "Bind address overridden from environment");
        config.listener.bind_address = bind;
    }
    if let Some(address) = env(ENV_DEPENDENCY) {
        match config.worker.dependency.as_mut() {
            Some(dependency) => dependency.address = address,
            None => {
                config.worker.dependency = Some(DependencyConfig {
                    address,
                    retry_interval_ms: 1000,
                })
            }
        }
    }
}
