//! Connection session: one per accepted transport.
//!
//! # Data Flow
//! ```text
//! loop:
//!     refresh idle deadline (now + 120s)
//!     → rate limiter (exhausted: sleep 50ms, retry)
//!     → codec::read_message (one frame, size-limited)
//!     → dispatch by kind → Handler
//!     → acknowledgement (if the kind has one)
//! exit (error, DISCONNECT, idle timeout, shutdown, panic):
//!     → close: shut the write half, drop the transport, decrement live count
//! ```
//!
//! A session is `Active` for as long as the value exists; [`Session::run`]
//! consumes it, so teardown cannot run twice.

pub mod handler;

use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::Instrument;

use crate::config::BrokerConfig;
use crate::lifecycle::ShutdownSignal;
use crate::net::connection::{ConnectionGuard, ConnectionId};
use crate::net::listener::{Origin, Transport};
use crate::observability::metrics;
use crate::protocol::{
    read_message, write_ack, Ack, ConnectReturnCode, DecodeError, Message, Qos, SubackCode,
};
use crate::security::RateLimiter;

pub use handler::{Handler, HandlerError};

/// A connection with no completed read or write for this long is torn down.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Pause before re-checking an exhausted read quota.
pub const RATE_LIMIT_BACKOFF: Duration = Duration::from_millis(50);

const READ_BUFFER_SIZE: usize = 65536;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Why a session ended abnormally.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("failed to write acknowledgement: {0}")]
    Write(#[source] std::io::Error),
    #[error("no traffic for {0:?}")]
    IdleTimeout(Duration),
    #[error("fault while processing message: {0}")]
    Fault(String),
}

impl SessionError {
    /// Metric label.
    pub fn reason(&self) -> &'static str {
        match self {
            SessionError::Decode(DecodeError::ConnectionClosed) => "closed",
            SessionError::Decode(_) => "decode",
            SessionError::Write(_) => "write",
            SessionError::IdleTimeout(_) => "idle_timeout",
            SessionError::Fault(_) => "fault",
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

/// Reads, dispatches and acknowledges messages for one client.
pub struct Session {
    guard: ConnectionGuard,
    peer: Option<SocketAddr>,
    origin: Origin,
    reader: BufReader<ReadHalf<Transport>>,
    /// Every acknowledgement goes through this lock.
    writer: Mutex<WriteHalf<Transport>>,
    limiter: RateLimiter,
    handler: Arc<dyn Handler>,
    max_message_size: usize,
    shutdown: ShutdownSignal,
}

impl Session {
    /// Wrap an accepted transport. `guard` is the live-count slot this
    /// session releases on teardown.
    pub fn new(
        transport: Transport,
        config: &BrokerConfig,
        handler: Arc<dyn Handler>,
        guard: ConnectionGuard,
        shutdown: ShutdownSignal,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(transport);
        Self {
            guard,
            peer: None,
            origin: Origin::Tcp,
            reader: BufReader::with_capacity(READ_BUFFER_SIZE, read_half),
            writer: Mutex::new(write_half),
            limiter: RateLimiter::per_second(config.limit.effective_read_rate()),
            handler,
            max_message_size: config.max_message_size(),
            shutdown,
        }
    }

    /// Record where the transport came from, for logs.
    pub fn with_peer(mut self, peer: SocketAddr, origin: Origin) -> Self {
        self.peer = Some(peer);
        self.origin = origin;
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.guard.id()
    }

    /// Run the read loop to completion, then tear down.
    ///
    /// DISCONNECT and shutdown end the session with `Ok(())`. A panic while
    /// processing is reported as [`SessionError::Fault`]; teardown runs on
    /// every path.
    pub async fn run(mut self) -> Result<(), SessionError> {
        let span = tracing::debug_span!(
            "session",
            connection_id = %self.id(),
            peer_addr = ?self.peer,
            origin = %self.origin,
        );

        async move {
            tracing::debug!("Session started");
            let result = match AssertUnwindSafe(self.process()).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(SessionError::Fault(panic_message(panic.as_ref()))),
            };

            match &result {
                Ok(()) => tracing::debug!("Session ended"),
                Err(SessionError::Fault(msg)) => {
                    metrics::record_session_error("fault");
                    tracing::warn!(panic = %msg, "Session fault, closing connection");
                }
                Err(err) => {
                    metrics::record_session_error(err.reason());
                    tracing::debug!(error = %err, "Session ended");
                }
            }

            self.close().await;
            result
        }
        .instrument(span)
        .await
    }

    async fn process(&mut self) -> Result<(), SessionError> {
        loop {
            // Every read and write in this iteration must finish before the deadline.
            let deadline = Instant::now() + IDLE_TIMEOUT;

            if self.limiter.limit() {
                metrics::record_rate_limited();
                tokio::select! {
                    biased;
                    _ = self.shutdown.recv() => return Ok(()),
                    _ = tokio::time::sleep(RATE_LIMIT_BACKOFF) => continue,
                }
            }

            let decoded = tokio::select! {
                biased;
                _ = self.shutdown.recv() => return Ok(()),
                decoded = tokio::time::timeout_at(
                    deadline,
                    read_message(&mut self.reader, self.max_message_size),
                ) => decoded,
            };
            let message = decoded.map_err(|_| SessionError::IdleTimeout(IDLE_TIMEOUT))??;
            metrics::record_message(message.kind());
            tracing::trace!(kind = message.kind(), "Message received");

            if let Flow::Stop = self.on_receive(message, deadline).await? {
                return Ok(());
            }
        }
    }

    async fn on_receive(
        &mut self,
        message: Message,
        deadline: Instant,
    ) -> Result<Flow, SessionError> {
        match message {
            Message::Connect(connect) => {
                let code = match self.handler.on_connect(&connect).await {
                    Ok(()) => ConnectReturnCode::Accepted,
                    Err(err) => {
                        tracing::debug!(client_id = %connect.client_id, error = %err, "Connect refused");
                        ConnectReturnCode::NotAuthorized
                    }
                };
                // A refused client is left open; it is expected to disconnect itself.
                self.send(Ack::Connack { code }, deadline).await
            }

            Message::Subscribe(subscribe) => {
                let mut codes = Vec::with_capacity(subscribe.filters.len());
                for filter in &subscribe.filters {
                    match self.handler.on_subscribe(&filter.topic).await {
                        Ok(()) => codes.push(SubackCode::Granted(filter.qos)),
                        Err(err) => {
                            tracing::debug!(topic = %filter.topic, error = %err, "Subscribe refused");
                            codes.push(SubackCode::Failure);
                        }
                    }
                }
                let ack = Ack::Suback {
                    message_id: subscribe.message_id,
                    codes,
                };
                self.send(ack, deadline).await
            }

            Message::Unsubscribe(unsubscribe) => {
                for topic in &unsubscribe.topics {
                    if let Err(err) = self.handler.on_unsubscribe(topic).await {
                        tracing::debug!(topic = %topic, error = %err, "Unsubscribe failed");
                    }
                }
                let ack = Ack::Unsuback {
                    message_id: unsubscribe.message_id,
                };
                self.send(ack, deadline).await
            }

            Message::PingRequest => self.send(Ack::Pingresp, deadline).await,

            Message::Disconnect => Ok(Flow::Stop),

            Message::Publish(publish) => {
                if let Err(err) = self.handler.on_publish(&publish).await {
                    tracing::debug!(topic = %publish.topic, error = %err, "Publish failed");
                }
                if publish.qos == Qos::AtMostOnce {
                    return Ok(Flow::Continue);
                }
                let ack = Ack::Puback {
                    message_id: publish.message_id,
                };
                self.send(ack, deadline).await
            }
        }
    }

    async fn send(&mut self, ack: Ack, deadline: Instant) -> Result<Flow, SessionError> {
        let mut writer = self.writer.lock().await;
        tokio::select! {
            biased;
            _ = self.shutdown.recv() => Ok(Flow::Stop),
            written = tokio::time::timeout_at(deadline, write_ack(&mut *writer, &ack)) => {
                match written {
                    Ok(Ok(())) => {
                        tracing::trace!(kind = ack.kind(), "Acknowledgement sent");
                        Ok(Flow::Continue)
                    }
                    Ok(Err(err)) => Err(SessionError::Write(err)),
                    Err(_) => Err(SessionError::IdleTimeout(IDLE_TIMEOUT)),
                }
            }
        }
    }

    /// Tear down. Dropping `self` releases the transport and the guard.
    async fn close(mut self) {
        let writer = self.writer.get_mut();
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, writer.shutdown()).await;
        tracing::trace!("Transport released");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic payload".to_string()
    }
}
