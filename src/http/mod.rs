//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Sniffed HTTP connection (net::listener)
//!     → server.rs (hyper http1 + Axum router, upgrades enabled)
//!     → WebSocket upgrade on any path
//!     → websocket.rs (WebSocket as byte stream)
//!     → accept callback, same as a raw TCP connection
//! ```

pub mod server;
pub mod websocket;

pub use server::{build_router, serve_connection, MQTT_SUBPROTOCOL};
pub use websocket::WsTransport;
