//! MQTT Gateway Library
//!
//! Front-end for a publish/subscribe broker: accepts MQTT 3.1.1 clients over
//! raw TCP or WebSocket on one port and hands decoded messages to a
//! [`Handler`].

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod protocol;
pub mod service;
pub mod session;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::BrokerConfig;
pub use lifecycle::Shutdown;
pub use service::{Service, ServiceError};
pub use session::{Handler, HandlerError, Session, SessionError};
