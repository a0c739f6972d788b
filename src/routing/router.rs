//! Route lookup.
//!
//! # Responsibilities
//! - Compile route configuration into matchers and policies
//! - Reject tables that cannot route every path
//! - Look up the route for a request path
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan in declaration order (acceptable for typical route counts)
//! - First match wins, even over a later, more specific pattern

use std::str::FromStr;
use std::time::Duration;

use axum::http::uri::Authority;
use axum::http::{HeaderValue, StatusCode};
use thiserror::Error;

use crate::config::{PathPattern, RouteConfig, TimeoutConfig};
use crate::routing::matcher::{ExactMatcher, Matcher, PathPrefixMatcher, RegexMatcher};
use crate::security::headers::{InvalidHeaderRule, RewriteRule};

/// Error raised while compiling the route table. All of these are fatal at startup.
#[derive(Debug, Error)]
pub enum RouteTableError {
    #[error("RouteNotFound: the route table must end with a catch-all prefix \"/\" route")]
    MissingCatchAll,

    #[error("route '{route}': invalid regex: {source}")]
    InvalidRegex {
        route: String,
        #[source]
        source: regex::Error,
    },

    #[error("route '{route}': upstream '{upstream}' must be host:port")]
    InvalidUpstream { route: String, upstream: String },

    #[error("route '{route}': invalid host header '{host}'")]
    InvalidHost { route: String, host: String },

    #[error("route '{route}': invalid redirect location '{location}'")]
    InvalidRedirect { route: String, location: String },

    #[error("route '{route}': {source}")]
    InvalidRule {
        route: String,
        #[source]
        source: InvalidHeaderRule,
    },
}

/// Where a matched request goes.
#[derive(Debug, Clone)]
pub enum RouteAction {
    /// Forward to an upstream.
    Proxy(Upstream),
    /// Answer with a redirect; nothing is forwarded.
    Redirect { location: HeaderValue, status: StatusCode },
}

/// A forwarding target.
#[derive(Debug, Clone)]
pub struct Upstream {
    /// `host:port` to connect to.
    pub authority: Authority,
    /// Host header value sent upstream.
    pub host: HeaderValue,
}

/// Per-route timeout, body and header policy.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// 0 = unlimited.
    pub max_body_size: u64,
    pub rewrite_rules: Vec<RewriteRule>,
}

/// A compiled route.
#[derive(Debug)]
pub struct Route {
    pub name: String,
    pub action: RouteAction,
    pub policy: RoutePolicy,
    matcher: Box<dyn Matcher>,
}

impl Route {
    /// Compile one route, filling unset timeouts from `defaults`.
    pub fn compile(
        config: &RouteConfig,
        defaults: &TimeoutConfig,
    ) -> Result<Self, RouteTableError> {
        let name = config.name.clone();

        let matcher: Box<dyn Matcher> = match &config.pattern {
            PathPattern::Exact(path) => Box::new(ExactMatcher::new(path.clone())),
            PathPattern::Prefix(prefix) => Box::new(PathPrefixMatcher::new(prefix.clone())),
            PathPattern::Regex(pattern) => Box::new(RegexMatcher::new(pattern).map_err(|source| {
                RouteTableError::InvalidRegex {
                    route: name.clone(),
                    source,
                }
            })?),
        };

        let action = match &config.redirect {
            Some(redirect) => RouteAction::Redirect {
                location: HeaderValue::from_str(&redirect.location).map_err(|_| {
                    RouteTableError::InvalidRedirect {
                        route: name.clone(),
                        location: redirect.location.clone(),
                    }
                })?,
                status: if redirect.permanent {
                    StatusCode::MOVED_PERMANENTLY
                } else {
                    StatusCode::FOUND
                },
            },
            None => RouteAction::Proxy(compile_upstream(config)?),
        };

        let rewrite_rules = config
            .rewrite_rules
            .iter()
            .map(RewriteRule::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| RouteTableError::InvalidRule {
                route: name.clone(),
                source,
            })?;

        let policy = RoutePolicy {
            connect_timeout: secs(config.connect_timeout_secs, defaults.connect_secs),
            read_timeout: secs(config.read_timeout_secs, defaults.read_secs),
            write_timeout: secs(config.write_timeout_secs, defaults.write_secs),
            max_body_size: config.max_body_size,
            rewrite_rules,
        };

        Ok(Self {
            name,
            action,
            policy,
            matcher,
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.matcher.matches(path)
    }
}

/// Per-route override, else the global default.
fn secs(route: Option<u64>, default: u64) -> Duration {
    Duration::from_secs(route.unwrap_or(default))
}

fn compile_upstream(config: &RouteConfig) -> Result<Upstream, RouteTableError> {
    let invalid = || RouteTableError::InvalidUpstream {
        route: config.name.clone(),
        upstream: config.upstream.clone(),
    };

    let authority = Authority::from_str(&config.upstream).map_err(|_| invalid())?;
    if authority.port_u16().is_none() || authority.host().is_empty() {
        return Err(invalid());
    }

    let host_str = config.host.as_deref().unwrap_or(authority.as_str());
    let host = HeaderValue::from_str(host_str).map_err(|_| RouteTableError::InvalidHost {
        route: config.name.clone(),
        host: host_str.to_string(),
    })?;

    Ok(Upstream { authority, host })
}

/// The ordered, immutable route table.
#[derive(Debug)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Compile the configured routes.
    ///
    /// Fails unless the last route is a catch-all, which makes a per-request
    /// miss impossible.
    pub fn compile(
        configs: &[RouteConfig],
        defaults: &TimeoutConfig,
    ) -> Result<Self, RouteTableError> {
        let routes = configs
            .iter()
            .map(|c| Route::compile(c, defaults))
            .collect::<Result<Vec<_>, _>>()?;

        match routes.last() {
            Some(last) if last.matcher.is_catch_all() => {}
            _ => return Err(RouteTableError::MissingCatchAll),
        }

        if let Some(pos) = routes.iter().position(|r| r.matcher.is_catch_all()) {
            for shadowed in &routes[pos + 1..] {
                tracing::warn!(
                    route = %shadowed.name,
                    catch_all = %routes[pos].name,
                    "Route is unreachable behind an earlier catch-all"
                );
            }
        }

        tracing::info!(routes = routes.len(), "Route table compiled");
        Ok(Self { routes })
    }

    /// Return the first route, in declaration order, that accepts `path`.
    pub fn match_path(&self, path: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.matches(path))
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }
}
