//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Compile the route table (fatal on error)
//! - Create the Axum router with the proxy handler as fallback
//! - Wire up middleware (reserved paths, request ID, access log, backpressure)
//! - Bind the server to a listener and drain on shutdown

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{middleware, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::config::RouterConfig;
use crate::http::proxy::{proxy_handler, AppState};
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::http::reserved::{reserved_paths, ReservedPaths};
use crate::routing::{RouteTable, RouteTableError};

/// HTTP server for the edge router.
pub struct HttpServer {
    router: Router,
    config: RouterConfig,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    ///
    /// Fails if the route table cannot be compiled; no request is ever
    /// served against a malformed table.
    pub fn new(config: RouterConfig) -> Result<Self, RouteTableError> {
        let table = RouteTable::compile(&config.routes, &config.timeouts)?;
        let state = AppState { table: Arc::new(table) };
        let router = Self::build_router(&config, state);
        Ok(Self { router, config })
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// Layers added later wrap the earlier ones, so the reserved-path
    /// middleware runs first and its responses skip everything else.
    fn build_router(config: &RouterConfig, state: AppState) -> Router {
        let reserved = ReservedPaths::new(&config.reserved);

        Router::new()
            .fallback(proxy_handler)
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(propagate_request_id_layer())
            .layer(set_request_id_layer())
            .layer(GlobalConcurrencyLimitLayer::new(config.listener.max_connections))
            .layer(middleware::from_fn_with_state(reserved, reserved_paths))
    }

    /// Run the server until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            routes = self.config.routes.len(),
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// The fully layered router, for in-process testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}
