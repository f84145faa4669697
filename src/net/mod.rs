//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, one task per connection)
//!     → tls.rs (optional TLS handshake)
//!     → sniff leading bytes
//!         HTTP request line → http::server (WebSocket upgrade)
//!         anything else     → raw MQTT stream
//!     → Accept callback (service), which tracks it via connection.rs
//! ```
//!
//! # Design Decisions
//! - Raw MQTT and WebSocket share one port; the first bytes decide the route
//! - Sniffed bytes are replayed to whichever path takes the stream
//! - TLS is optional and wraps the socket before sniffing

pub mod connection;
pub mod listener;
pub mod tls;
