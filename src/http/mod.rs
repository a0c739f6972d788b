//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack)
//!     → reserved.rs (health check, robots.txt; short-circuits)
//!     → request.rs (request ID)
//!     → proxy.rs (route lookup, body limit, header rewrite, upstream exchange)
//!     → Stream response to client
//! ```

pub mod proxy;
pub mod request;
pub mod reserved;
pub mod server;

pub use request::X_REQUEST_ID;
pub use server::HttpServer;
