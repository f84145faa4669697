//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use serde::Deserialize;

/// Hard ceiling on a single frame, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 65536;

/// Messages per second admitted per connection when `read_rate` is unset.
pub const DEFAULT_READ_RATE: u32 = 100_000;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BrokerConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Per-connection size and rate limits.
    pub limit: LimitConfig,

    /// Shutdown behaviour.
    pub shutdown: ShutdownConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl BrokerConfig {
    /// Returns the configured max message size, clamped to `(0, 65536]`.
    pub fn max_message_size(&self) -> usize {
        if self.limit.message_size == 0 || self.limit.message_size > MAX_MESSAGE_SIZE {
            return MAX_MESSAGE_SIZE;
        }
        self.limit.message_size
    }

    /// Resolve the configured bind address.
    pub fn listen_address(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener
            .bind_address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    format!("no address resolved for {}", self.listener.bind_address),
                )
            })
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:1883").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// How long a fresh connection may take to send its first bytes.
    pub sniff_timeout_secs: u64,
}

impl ListenerConfig {
    pub fn sniff_timeout(&self) -> Duration {
        Duration::from_secs(self.sniff_timeout_secs)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:1883".to_string(),
            tls: None,
            sniff_timeout_secs: 120,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Limits applied to every client connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitConfig {
    /// Maximum message size allowed from the client, in bytes.
    #[serde(alias = "messageSize")]
    pub message_size: usize,

    /// Maximum messages per second processed per connection. Zero means default.
    #[serde(alias = "readRate")]
    pub read_rate: u32,

    /// Maximum socket writes per second per connection. Handed to the
    /// transport layer, the session itself does not use it.
    #[serde(alias = "flushRate")]
    pub flush_rate: u32,
}

impl LimitConfig {
    /// Read rate with the zero/unset fallback applied.
    pub fn effective_read_rate(&self) -> u32 {
        if self.read_rate == 0 {
            DEFAULT_READ_RATE
        } else {
            self.read_rate
        }
    }
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            message_size: MAX_MESSAGE_SIZE,
            read_rate: DEFAULT_READ_RATE,
            flush_rate: 60,
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Upper bound on waiting for live sessions after shutdown, in seconds.
    pub drain_timeout_secs: u64,
}

impl ShutdownConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 5,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
