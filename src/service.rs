//! Gateway service: binds the listener and owns every session.
//!
//! # Responsibilities
//! - Bind the multiplexed listener (raw MQTT and WebSocket on one port)
//! - Turn each accepted transport into a [`Session`] on its own task
//! - Count live sessions
//! - Stop accepting on shutdown and wait, bounded, for sessions to drain

use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::config::BrokerConfig;
use crate::lifecycle::{signals, Shutdown};
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{Accept, ListenerError, Multiplexer, MuxOptions, Origin, Transport};
use crate::net::tls::{load_tls_acceptor, TlsError};
use crate::session::{Handler, Session};

/// Errors that stop the service from starting.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid listen address: {0}")]
    InvalidAddress(#[source] io::Error),
    #[error(transparent)]
    Bind(#[from] ListenerError),
    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),
}

/// The gateway. Cloning shares the same state.
#[derive(Clone)]
pub struct Service {
    inner: Arc<Inner>,
}

struct Inner {
    config: BrokerConfig,
    handler: Arc<dyn Handler>,
    tracker: ConnectionTracker,
    shutdown: Shutdown,
}

impl Service {
    pub fn new(config: BrokerConfig, handler: Arc<dyn Handler>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                handler,
                tracker: ConnectionTracker::new(),
                shutdown: Shutdown::new(),
            }),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    /// Number of live sessions.
    pub fn connections(&self) -> u64 {
        self.inner.tracker.active_count()
    }

    /// Bind, hook SIGINT/SIGTERM, and serve until shutdown has drained.
    pub async fn start(&self) -> Result<(), ServiceError> {
        let mux = self.bind().await?;
        signals::hook_signals(self.inner.shutdown.clone());
        self.serve(mux).await;
        Ok(())
    }

    /// Bind the configured address, loading TLS material if configured.
    pub async fn bind(&self) -> Result<Multiplexer, ServiceError> {
        let config = &self.inner.config;
        let addr = config
            .listen_address()
            .map_err(ServiceError::InvalidAddress)?;

        let tls = match &config.listener.tls {
            Some(tls) => Some(load_tls_acceptor(
                Path::new(&tls.cert_path),
                Path::new(&tls.key_path),
            )?),
            None => None,
        };

        let options = MuxOptions {
            tls,
            sniff_timeout: config.listener.sniff_timeout(),
            flush_rate: config.limit.flush_rate,
        };
        Ok(Multiplexer::bind(addr, options).await?)
    }

    /// Accept on `mux` until shutdown, then wait for live sessions to close.
    pub async fn serve(&self, mux: Multiplexer) {
        let acceptor: Arc<dyn Accept> = Arc::new(self.clone());
        let accept_loop = tokio::spawn(mux.run(acceptor, self.inner.shutdown.subscribe()));

        self.inner.shutdown.subscribe().recv().await;
        if let Err(err) = accept_loop.await {
            tracing::error!(error = %err, "Accept loop task failed");
        }

        let live = self.connections();
        let drain_timeout = self.inner.config.shutdown.drain_timeout();
        tracing::info!(live, ?drain_timeout, "Draining sessions");

        if self.inner.tracker.wait_for_drain(drain_timeout).await {
            tracing::info!("All sessions closed");
        } else {
            tracing::warn!(
                remaining = self.connections(),
                "Drain timeout elapsed with sessions still open"
            );
        }
    }

    /// Signal shutdown. Only the first call has an effect.
    pub fn shutdown(&self) {
        if self.inner.shutdown.trigger() {
            tracing::info!("Shutdown requested");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_triggered()
    }
}

impl Accept for Service {
    fn on_accept(&self, transport: Transport, peer: SocketAddr, origin: Origin) {
        let guard = self.inner.tracker.track();
        let connection_id = guard.id();
        tracing::debug!(%connection_id, peer_addr = %peer, %origin, "Session accepted");

        let session = Session::new(
            transport,
            &self.inner.config,
            Arc::clone(&self.inner.handler),
            guard,
            self.inner.shutdown.subscribe(),
        )
        .with_peer(peer, origin);

        // Outcome is logged and counted by the session itself.
        tokio::spawn(session.run());
    }
}
