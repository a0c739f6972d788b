//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to upstream:
//!     → connect budget (TCP connect + handshake)
//!     → write budget (idle gap while the request body is sent)
//!     → read budget (response head, then idle gap between body chunks)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every upstream exchange has deadlines
//! - No retries: a failed request is reported, the caller decides
//! - A timeout cancels only its own request

pub mod timeouts;
