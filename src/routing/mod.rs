//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request path
//!     → router.rs (route lookup, declaration order)
//!     → matcher.rs (exact / prefix / regex)
//!     → Return: matched Route (a catch-all guarantees one)
//!
//! Route Compilation (at startup):
//!     RouteConfig[]
//!     → Compile matchers, upstreams, header rules
//!     → Require a trailing catch-all
//!     → Freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - Deterministic: same input always matches same route
//! - First match wins (declaration order is the contract)

pub mod matcher;
pub mod router;

pub use router::{Route, RouteAction, RoutePolicy, RouteTable, RouteTableError, Upstream};
