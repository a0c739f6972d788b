//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, deserialize, environment overrides)
//!     → validation.rs (semantic checks)
//!     → RouterConfig (validated, immutable)
//!     → routes compiled once into routing::RouteTable
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    DependencyConfig, HeaderRule, ListenerConfig, ObservabilityConfig, PathPattern, RedirectConfig,
    ReservedConfig, RouteConfig, RouterConfig, TimeoutConfig, WatchConfig, WorkerConfig,
};
