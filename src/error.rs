//! Per-request proxy errors and their HTTP responses.

use std::io;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::resilience::timeouts::Phase;

/// Header carrying a stable, machine-readable error code.
pub const X_PROXY_ERROR: &str = "x-proxy-error";

/// Everything that can go wrong while dispatching one request.
///
/// None of these are retried; retry policy belongs to the caller.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// No route accepted the path. Startup validation makes this unreachable.
    #[error("no route matches {path}")]
    RouteNotFound { path: String },

    /// The upstream could not be reached or broke the connection.
    #[error("upstream {upstream} unavailable: {reason}")]
    UpstreamUnavailable { upstream: String, reason: String },

    /// The request body exceeds the route's limit. Upstream never contacted.
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    /// A connect, read or write budget elapsed.
    #[error("upstream {phase} timeout")]
    Timeout { phase: Phase },

    /// The inbound body could not be read.
    #[error("malformed request: {0}")]
    BadRequest(String),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::RouteNotFound { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// True when the upstream side failed (502/504); client-side rejections
    /// such as 400 and 413 are not upstream failures.
    pub fn is_upstream_failure(&self) -> bool {
        matches!(
            self,
            ProxyError::UpstreamUnavailable { .. } | ProxyError::Timeout { .. }
        )
    }

    /// Value for the `x-proxy-error` header.
    pub fn code(&self) -> &'static str {
        match self {
            ProxyError::RouteNotFound { .. } => "ROUTE_NOT_FOUND",
            ProxyError::UpstreamUnavailable { .. } => "UPSTREAM_UNAVAILABLE",
            ProxyError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            ProxyError::Timeout { phase: Phase::Connect } => "CONNECT_TIMEOUT",
            ProxyError::Timeout { phase: Phase::Read } => "READ_TIMEOUT",
            ProxyError::Timeout { phase: Phase::Write } => "WRITE_TIMEOUT",
            ProxyError::BadRequest(_) => "BAD_REQUEST",
        }
    }
}

/// Failures of the worker lifecycle manager.
///
/// An unreachable dependency is not an error: it is logged and retried.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("no command configured for role '{role}'")]
    EmptyCommand { role: &'static str },

    #[error("unknown role '{0}', expected 'worker' or 'migrate'")]
    UnknownRole(String),

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to wait for worker process: {0}")]
    Wait(#[source] io::Error),

    #[error("failed to watch sources: {0}")]
    Watch(#[from] notify::Error),

    #[error("failed to signal worker process: {0}")]
    Signal(#[source] io::Error),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Upstream details stay in the logs.
        let body = match &self {
            ProxyError::UpstreamUnavailable { .. } => "Upstream unavailable".to_string(),
            ProxyError::RouteNotFound { .. } => "No matching route".to_string(),
            other => other.to_string(),
        };

        let mut response = (status, body).into_response();
        let headers = response.headers_mut();
        headers.insert(X_PROXY_ERROR, HeaderValue::from_static(self.code()));
        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        response
    }
}
