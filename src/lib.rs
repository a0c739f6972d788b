//! Edge router library: path-based reverse proxy and worker lifecycle manager.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod security;
pub mod worker;

pub use config::RouterConfig;
pub use error::{ProxyError, WorkerError};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use routing::RouteTable;
pub use worker::WorkerManager;
