//! MQTT Gateway
//!
//! Accepts MQTT clients on one port, raw or over WebSocket, and feeds their
//! messages to a handler.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌──────────────────────────────────────────────────────┐
//!                  │                     GATEWAY                          │
//!                  │                                                      │
//!   TCP / TLS      │  ┌────────────┐  raw MQTT                            │
//!   ───────────────┼─▶│    net     │──────────────┐                       │
//!                  │  │ multiplexer│              ▼                       │
//!                  │  └─────┬──────┘       ┌────────────┐   ┌──────────┐  │
//!                  │        │ HTTP         │  service   │──▶│ session  │  │
//!                  │        ▼              │ on_accept  │   │ run loop │  │
//!                  │  ┌────────────┐  ws   └────────────┘   └────┬─────┘  │
//!                  │  │ http/axum  │───────────▲                 │        │
//!                  │  │  upgrade   │                             ▼        │
//!                  │  └────────────┘                      ┌────────────┐  │
//!                  │                                      │  Handler   │  │
//!                  │                                      └────────────┘  │
//!                  │  config · lifecycle · observability · security       │
//!                  └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;

use mqtt_gateway::config::validation::validate_config;
use mqtt_gateway::config::{load_config, BrokerConfig, ConfigError};
use mqtt_gateway::observability::{logging, metrics};
use mqtt_gateway::protocol::{Connect, Publish};
use mqtt_gateway::{Handler, HandlerError, Service};

#[derive(Parser)]
#[command(name = "mqtt-gateway")]
#[command(about = "MQTT front-end over TCP and WebSocket", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration file
    #[arg(short, long)]
    bind: Option<String>,
}

/// Accepts everything and logs it.
struct LoggingHandler;

#[async_trait]
impl Handler for LoggingHandler {
    async fn on_connect(&self, connect: &Connect) -> Result<(), HandlerError> {
        tracing::info!(
            client_id = %connect.client_id,
            keep_alive = connect.keep_alive,
            clean_session = connect.clean_session,
            "Client connected"
        );
        Ok(())
    }

    async fn on_subscribe(&self, topic: &str) -> Result<(), HandlerError> {
        tracing::info!(topic, "Subscribe");
        Ok(())
    }

    async fn on_unsubscribe(&self, topic: &str) -> Result<(), HandlerError> {
        tracing::info!(topic, "Unsubscribe");
        Ok(())
    }

    async fn on_publish(&self, publish: &Publish) -> Result<(), HandlerError> {
        tracing::info!(
            topic = %publish.topic,
            qos = publish.qos.as_u8(),
            bytes = publish.payload.len(),
            "Publish"
        );
        Ok(())
    }
}

fn resolve_config(cli: &Cli) -> Result<BrokerConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => BrokerConfig::default(),
    };
    if let Some(bind) = &cli.bind {
        config.listener.bind_address = bind.clone();
        validate_config(&config).map_err(ConfigError::Validation)?;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    logging::init_logging(&config.observability);
    tracing::info!("mqtt-gateway v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        tls = config.listener.tls.is_some(),
        message_size = config.max_message_size(),
        read_rate = config.limit.effective_read_rate(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let service = Service::new(config, Arc::new(LoggingHandler));
    if let Err(err) = service.start().await {
        tracing::error!(error = %err, "Failed to start gateway");
        std::process::exit(1);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
