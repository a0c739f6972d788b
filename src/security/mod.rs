//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Matched request:
//!     → limits.rs (body size, before any upstream contact)
//!     → headers.rs (strip hop-by-hop, rules, Host, X-Forwarded-For)
//!     → Forward to upstream
//! ```
//!
//! # Design Decisions
//! - Fail closed: an oversized body is rejected, never truncated
//! - No trust in client input: Host is always replaced

pub mod headers;
pub mod limits;
