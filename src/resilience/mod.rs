//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to upstream:
//!     → timeouts.rs (response head within the upstream budget)
//!     → timeouts.rs (each body read within the upstream budget)
//!     → timeouts.rs (everything within the client lifetime budget)
//! ```
//!
//! # Design Decisions
//! - A single upstream: failures are reported, never retried
//! - Budgets are optional; zero in the config disables them

pub mod timeouts;

pub use timeouts::{guarded, Deadline, TimeoutKind};
