//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Session loop iteration:
//!     → rate_limit.rs (per-connection read quota)
//!     → defer 50ms when exhausted, otherwise decode next frame
//! ```
//!
//! # Design Decisions
//! - Each connection has its own quota; a noisy client only slows itself
//! - Throttle instead of drop: input stays in the socket until admitted

pub mod rate_limit;

pub use rate_limit::RateLimiter;
