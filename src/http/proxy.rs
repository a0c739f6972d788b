//! Request dispatch to upstreams.
//!
//! # Responsibilities
//! - Select the route for the request path
//! - Answer redirect routes directly
//! - Enforce the route's body limit before any upstream contact
//! - Rewrite headers and forward over a dedicated upstream connection
//! - Enforce connect, write and read budgets independently
//! - Stream the response back
//!
//! # Design Decisions
//! - One upstream connection per request, never pooled
//! - The connection task is aborted as soon as the client side goes away
//! - No retries; the caller owns retry policy
//! - Hop-by-hop headers stripped from the upstream response

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, Request, Uri, Version},
    response::{IntoResponse, Response},
};
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use crate::error::ProxyError;
use crate::http::request::request_id;
use crate::observability::metrics;
use crate::resilience::timeouts::{elapsed_phase, within, Phase, TimedBody};
use crate::routing::{Route, RouteAction, RouteTable, Upstream};
use crate::security::headers::{rewrite_headers, strip_hop_by_hop, ForwardingInfo};
use crate::security::limits::enforce_body_limit;

type UpstreamSender = SendRequest<TimedBody<Body>>;

/// Application state injected into handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub table: Arc<RouteTable>,
}

/// Aborts the upstream connection task when dropped.
#[derive(Debug)]
struct ConnectionTask(JoinHandle<()>);

impl Drop for ConnectionTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Main proxy handler.
/// Looks up the route and dispatches the request to it.
pub async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let received_at = SystemTime::now();
    let start = Instant::now();
    let path = request.uri().path().to_string();
    let request_id = request_id(request.headers()).to_string();

    let Some(route) = state.table.match_path(&path) else {
        tracing::error!(request_id = %request_id, path = %path, "No route matched");
        return ProxyError::RouteNotFound { path }.into_response();
    };

    tracing::debug!(
        request_id = %request_id,
        method = %request.method(),
        path = %path,
        route = %route.name,
        "Dispatching request"
    );

    let response = match dispatch(route, request, peer, received_at).await {
        Ok(response) => response,
        Err(e) => {
            if e.is_upstream_failure() {
                tracing::error!(
                    request_id = %request_id,
                    route = %route.name,
                    error = %e,
                    "Upstream error"
                );
                metrics::record_upstream_error(&route.name, e.code());
            } else {
                tracing::warn!(
                    request_id = %request_id,
                    route = %route.name,
                    error = %e,
                    "Request rejected"
                );
            }
            e.into_response()
        }
    };

    metrics::record_request(&route.name, response.status().as_u16(), start);
    response
}

/// Forward `request` according to `route`.
pub async fn dispatch(
    route: &Route,
    request: Request<Body>,
    peer: SocketAddr,
    received_at: SystemTime,
) -> Result<Response, ProxyError> {
    let upstream = match &route.action {
        RouteAction::Redirect { location, status } => {
            return Ok((*status, [(header::LOCATION, location.clone())]).into_response());
        }
        RouteAction::Proxy(upstream) => upstream,
    };
    let policy = &route.policy;

    // 1. Body limit, before the upstream is ever contacted
    let (mut parts, body) = request.into_parts();
    let body = enforce_body_limit(
        &parts.headers,
        body,
        policy.max_body_size,
        policy.write_timeout,
    )
    .await?;

    // 2. Outbound head
    rewrite_headers(
        &mut parts.headers,
        &upstream.host,
        &policy.rewrite_rules,
        ForwardingInfo {
            client_ip: peer.ip(),
            received_at,
        },
    );
    parts.uri = parts
        .uri
        .path_and_query()
        .cloned()
        .map(Uri::from)
        .unwrap_or_else(|| Uri::from_static("/"));
    parts.version = Version::HTTP_11;

    // 3. Connect phase
    let (mut sender, connection) = connect(upstream, policy.connect_timeout).await?;

    // 4. Write phase: the body's idle budget is enforced while hyper pulls it
    let mut body = TimedBody::new(body, Phase::Write, policy.write_timeout);
    let written = body.on_done();
    let response_future = sender.send_request(Request::from_parts(parts, body));
    tokio::pin!(response_future);

    // 5. Read phase starts once the request body is handed over
    let early = tokio::select! {
        biased;
        result = &mut response_future => Some(result),
        _ = written => None,
    };
    let result = match early {
        Some(result) => result,
        None => within(Phase::Read, policy.read_timeout, &mut response_future).await?,
    };
    let response = result.map_err(|e| transport_error(upstream, &e))?;

    // 6. Stream back; the body owns the connection from here on
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    let body = TimedBody::new(body, Phase::Read, policy.read_timeout).with_guard(connection);
    Ok(Response::from_parts(parts, Body::new(body)))
}

/// Open a dedicated HTTP/1.1 connection to `upstream`.
async fn connect(
    upstream: &Upstream,
    budget: std::time::Duration,
) -> Result<(UpstreamSender, ConnectionTask), ProxyError> {
    let addr = upstream.authority.as_str();
    let unavailable = |reason: String| ProxyError::UpstreamUnavailable {
        upstream: addr.to_string(),
        reason,
    };

    let handshake = async {
        let stream = TcpStream::connect(addr).await.map_err(|e| unavailable(e.to_string()))?;
        let _ = stream.set_nodelay(true);
        http1::handshake::<_, TimedBody<Body>>(TokioIo::new(stream))
            .await
            .map_err(|e| unavailable(e.to_string()))
    };
    let (sender, conn) = within(Phase::Connect, budget, handshake).await??;

    let upstream_addr = addr.to_string();
    let task = tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!(
                upstream = %upstream_addr,
                error = %e,
                "Upstream connection ended with error"
            );
        }
    });

    Ok((sender, ConnectionTask(task)))
}

fn transport_error(upstream: &Upstream, err: &hyper::Error) -> ProxyError {
    match elapsed_phase(err) {
        Some(phase) => ProxyError::Timeout { phase },
        None => ProxyError::UpstreamUnavailable {
            upstream: upstream.authority.to_string(),
            reason: err.to_string(),
        },
    }
}
