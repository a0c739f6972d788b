//! Paths answered by the router itself.
//!
//! The liveness check and the bot-exclusion document are served by the
//! outermost middleware, ahead of request IDs, the access log, metrics and
//! the route table. A health checker hammering the health path therefore
//! costs no log line and never waits on an upstream.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::config::ReservedConfig;

pub const ROBOTS_TXT: &str = "User-agent: *\nDisallow: /\n";

/// Reserved path lookup shared by every connection.
#[derive(Debug, Clone)]
pub struct ReservedPaths {
    health: Arc<str>,
    robots: Arc<str>,
}

impl ReservedPaths {
    pub fn new(config: &ReservedConfig) -> Self {
        Self {
            health: Arc::from(config.health_path.as_str()),
            robots: Arc::from(config.robots_path.as_str()),
        }
    }

    /// The fixed response for `path`, if it is reserved.
    pub fn respond(&self, path: &str) -> Option<Response> {
        if path == &*self.health {
            Some(StatusCode::OK.into_response())
        } else if path == &*self.robots {
            Some(([(header::CONTENT_TYPE, "text/plain")], ROBOTS_TXT).into_response())
        } else {
            None
        }
    }
}

/// Middleware short-circuiting reserved paths.
pub async fn reserved_paths(
    State(paths): State<ReservedPaths>,
    request: Request<Body>,
    next: Next,
) -> Response {
    match paths.respond(request.uri().path()) {
        Some(response) => response,
        None => next.run(request).await,
    }
}
