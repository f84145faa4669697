//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (service.rs):
//!     Load config → Validate → Bind listener → Hook signals → Accept
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Sessions observe signal → Drain → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Fail fast: a bind error is fatal
//! - Shutdown has timeout: the drain gives up after a deadline

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownSignal};
