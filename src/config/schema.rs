//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the router
//! and the worker supervisor. All types derive Serde traits for
//! deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration shared by the proxy and the worker supervisor.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Default per-phase timeouts, overridable per route.
    pub timeouts: TimeoutConfig,

    /// Ordered route table. Declaration order is match order.
    pub routes: Vec<RouteConfig>,

    /// Paths answered by the router itself.
    pub reserved: ReservedConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Worker supervisor settings.
    pub worker: WorkerConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            timeouts: TimeoutConfig::default(),
            routes: default_routes(),
            reserved: ReservedConfig::default(),
            observability: ObservabilityConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

/// The stock table: one backend for the app and auth paths, one for static
/// assets, one catch-all for the public site.
fn default_routes() -> Vec<RouteConfig> {
    let mut login = RouteConfig::new("login-redirect", PathPattern::Exact("/login".into()), "");
    login.redirect = Some(RedirectConfig {
        location: "/login/".into(),
        permanent: false,
    });

    let mut routes = vec![login];
    for prefix in ["/admin/", "/api/", "/login/", "/oidc/"] {
        let name = format!("app-{}", prefix.trim_matches('/'));
        routes.push(RouteConfig::new(name, PathPattern::Prefix(prefix.into()), "127.0.0.1:8001"));
    }
    routes.push(RouteConfig::new(
        "static",
        PathPattern::Prefix("/static/".into()),
        "127.0.0.1:8002",
    ));
    routes.push(RouteConfig::new("site", PathPattern::Prefix("/".into()), "127.0.0.1:8003"));
    routes
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Timeout configuration for the three upstream phases.
///
/// The defaults are deliberately wider than the budget of a typical fronting
/// CDN so the origin stays authoritative about request failure.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Upstream read timeout (response head, then between body chunks) in seconds.
    pub read_secs: u64,

    /// Upstream write timeout (between request body chunks) in seconds.
    pub write_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 120,
            read_secs: 120,
            write_secs: 120,
        }
    }
}

/// How a route matches the request path.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PathPattern {
    /// Path must equal the value.
    Exact(String),
    /// Path must start with the value. `/` is the catch-all.
    Prefix(String),
    /// Path must match the regular expression.
    Regex(String),
}

/// Route configuration mapping a path pattern to an upstream.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    pub name: String,

    /// Path matcher, e.g. `pattern = { prefix = "/api/" }`.
    pub pattern: PathPattern,

    /// Upstream address (e.g., "127.0.0.1:3000"). Unused by redirect routes.
    #[serde(default)]
    pub upstream: String,

    /// Host header sent upstream. Defaults to the upstream address.
    #[serde(default)]
    pub host: Option<String>,

    /// Per-route override of `timeouts.connect_secs`.
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,

    /// Per-route override of `timeouts.read_secs`.
    #[serde(default)]
    pub read_timeout_secs: Option<u64>,

    /// Per-route override of `timeouts.write_secs`.
    #[serde(default)]
    pub write_timeout_secs: Option<u64>,

    /// Maximum request body in bytes; 0 streams bodies of any size.
    #[serde(default)]
    pub max_body_size: u64,

    /// Header rewrite instructions, applied in order.
    #[serde(default)]
    pub rewrite_rules: Vec<HeaderRule>,

    /// Answer with a redirect instead of proxying.
    #[serde(default)]
    pub redirect: Option<RedirectConfig>,
}

impl RouteConfig {
    /// A route with global timeouts, no body limit and no rules.
    pub fn new(name: impl Into<String>, pattern: PathPattern, upstream: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern,
            upstream: upstream.into(),
            host: None,
            connect_timeout_secs: None,
            read_timeout_secs: None,
            write_timeout_secs: None,
            max_body_size: 0,
            rewrite_rules: Vec::new(),
            redirect: None,
        }
    }
}

/// A single header rewrite instruction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum HeaderRule {
    /// Replace every value of `name` with `value`.
    Set { name: String, value: String },
    /// Add `value` alongside existing values of `name`.
    Append { name: String, value: String },
    /// Drop every value of `name`.
    Remove { name: String },
}

/// Redirect action for a route.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedirectConfig {
    /// Value of the `Location` header.
    pub location: String,

    /// 301 when true, 302 otherwise.
    #[serde(default)]
    pub permanent: bool,
}

/// Paths the router answers itself.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReservedConfig {
    /// Liveness check path.
    pub health_path: String,

    /// Bot-exclusion document path.
    pub robots_path: String,
}

impl Default for ReservedConfig {
    fn default() -> Self {
        Self {
            health_path: "/health/nginx".to_string(),
            robots_path: "/robots.txt".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins.
    pub log_level: String,

    /// "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Worker supervisor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Program and arguments for the long-running worker.
    pub command: Vec<String>,

    /// Program and arguments for the one-shot migration role.
    pub migrate_command: Vec<String>,

    /// Environment variable holding the role (`worker` or `migrate`).
    pub role_env: String,

    /// Extra environment entries for the subprocess.
    pub env: BTreeMap<String, String>,

    /// Dependency that must accept TCP connections before launch.
    pub dependency: Option<DependencyConfig>,

    /// Restart the worker when these sources change.
    pub watch: Option<WatchConfig>,

    /// Kill the subprocess if it has not exited this long after SIGTERM.
    /// Unset means wait indefinitely.
    pub grace_period_secs: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            migrate_command: Vec::new(),
            role_env: "CONTAINER_ROLE".to_string(),
            env: BTreeMap::new(),
            dependency: None,
            watch: None,
            grace_period_secs: None,
        }
    }
}

/// External dependency polled before the worker starts.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DependencyConfig {
    /// `host:port` to connect to.
    pub address: String,

    /// Delay between attempts in milliseconds.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

fn default_retry_interval_ms() -> u64 {
    1000
}

impl DependencyConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Source watching for hot restart.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchConfig {
    /// Files or directories to watch recursively.
    pub paths: Vec<String>,

    /// Only changes to files with these extensions count. Empty means all.
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Quiet period before a burst of changes triggers one restart.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_debounce_ms() -> u64 {
    1600
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}
