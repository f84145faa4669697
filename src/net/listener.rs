//! TCP listener multiplexing raw MQTT and HTTP on one port.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept incoming TCP connections, optionally wrapping them in TLS
//! - Sniff the leading bytes of each connection and route it either to the
//!   HTTP server (WebSocket upgrade) or straight to the raw stream path
//! - Stop accepting when shutdown is signalled

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

use crate::http::server;
use crate::lifecycle::ShutdownSignal;

/// Byte stream a session reads frames from and writes acknowledgements to.
pub trait TransportStream: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> TransportStream for T {}

/// Boxed transport handed to the accept callback.
pub type Transport = Box<dyn TransportStream + Unpin + Send>;

/// Which route produced a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Raw MQTT over TCP (or TLS).
    Tcp,
    /// MQTT over a WebSocket upgraded from HTTP.
    WebSocket,
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Origin::Tcp => f.write_str("tcp"),
            Origin::WebSocket => f.write_str("websocket"),
        }
    }
}

/// Callback receiving every accepted transport, whichever route it came from.
pub trait Accept: Send + Sync + 'static {
    fn on_accept(&self, transport: Transport, peer: SocketAddr, origin: Origin);
}

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: io::Error,
    },
}

/// Options for the multiplexer.
#[derive(Clone, Default)]
pub struct MuxOptions {
    /// Optional TLS acceptor applied before sniffing.
    pub tls: Option<TlsAcceptor>,
    /// Bound on TLS handshake plus the first bytes of a connection.
    pub sniff_timeout: Duration,
    /// Socket write rate passed through from `limit.flush_rate`.
    pub flush_rate: u32,
}

/// A bound listener routing each connection to the raw or HTTP path.
pub struct Multiplexer {
    /// The underlying TCP listener.
    inner: TcpListener,
    options: MuxOptions,
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("local_addr", &self.inner.local_addr().ok())
            .field("tls", &self.options.tls.is_some())
            .field("sniff_timeout", &self.options.sniff_timeout)
            .finish()
    }
}

impl Multiplexer {
    /// Bind to `addr`.
    pub async fn bind(addr: SocketAddr, options: MuxOptions) -> Result<Self, ListenerError> {
        let inner = TcpListener::bind(addr)
            .await
            .map_err(|source| ListenerError::Bind { addr, source })?;
        let local_addr = inner
            .local_addr()
            .map_err(|source| ListenerError::Bind { addr, source })?;

        tracing::info!(
            address = %local_addr,
            tls = options.tls.is_some(),
            flush_rate = options.flush_rate,
            "Listener bound"
        );

        Ok(Self { inner, options })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, io::Error> {
        self.inner.local_addr()
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// Every connection is routed on its own task so a slow handshake never
    /// holds up the accept loop.
    pub async fn run(self, acceptor: Arc<dyn Accept>, shutdown: ShutdownSignal) {
        let router = server::build_router(Arc::clone(&acceptor));

        loop {
            let (stream, peer) = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                accepted = self.inner.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        // Usually fd exhaustion; give in-flight connections a chance to close.
                        tracing::warn!(error = %err, "Failed to accept connection");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
            };

            tracing::debug!(peer_addr = %peer, "Connection accepted");
            let route = Route {
                acceptor: Arc::clone(&acceptor),
                router: router.clone(),
                peer,
                sniff_timeout: self.options.sniff_timeout,
                shutdown: shutdown.clone(),
            };
            let tls = self.options.tls.clone();
            tokio::spawn(route.run(stream, tls));
        }

        tracing::info!("Listener stopped accepting");
    }
}

/// Per-connection routing context.
struct Route {
    acceptor: Arc<dyn Accept>,
    router: axum::Router,
    peer: SocketAddr,
    sniff_timeout: Duration,
    shutdown: ShutdownSignal,
}

impl Route {
    async fn run(self, stream: TcpStream, tls: Option<TlsAcceptor>) {
        let Some(tls) = tls else {
            return self.dispatch(stream).await;
        };
        match tokio::time::timeout(self.sniff_timeout, tls.accept(stream)).await {
            Ok(Ok(stream)) => self.dispatch(stream).await,
            Ok(Err(err)) => {
                tracing::debug!(peer_addr = %self.peer, error = %err, "TLS handshake failed")
            }
            Err(_) => tracing::debug!(peer_addr = %self.peer, "TLS handshake timed out"),
        }
    }

    async fn dispatch<S>(self, mut stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (protocol, prefix) =
            match tokio::time::timeout(self.sniff_timeout, read_prefix(&mut stream)).await {
                Ok(Ok(sniffed)) => sniffed,
                Ok(Err(err)) => {
                    tracing::debug!(peer_addr = %self.peer, error = %err, "Connection closed before routing");
                    return;
                }
                Err(_) => {
                    tracing::debug!(peer_addr = %self.peer, "Connection sent nothing before timeout");
                    return;
                }
            };

        let stream = Rewind::new(prefix.freeze(), stream);
        match protocol {
            Protocol::Http => {
                tokio::select! {
                    served = server::serve_connection(stream, self.peer, self.router) => {
                        if let Err(err) = served {
                            tracing::debug!(peer_addr = %self.peer, error = %err, "HTTP connection error");
                        }
                    }
                    _ = self.shutdown.recv() => {}
                }
            }
            Protocol::Raw => {
                self.acceptor.on_accept(Box::new(stream), self.peer, Origin::Tcp);
            }
        }
    }
}

const HTTP_METHODS: [&[u8]; 9] = [
    b"GET ",
    b"POST ",
    b"PUT ",
    b"HEAD ",
    b"DELETE ",
    b"OPTIONS ",
    b"PATCH ",
    b"CONNECT ",
    b"TRACE ",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protocol {
    Http,
    Raw,
}

/// Classify a connection by its leading bytes.
///
/// `None` while the bytes are still a prefix of some HTTP method.
fn sniff(prefix: &[u8]) -> Option<Protocol> {
    let mut incomplete = false;
    for method in HTTP_METHODS {
        let n = prefix.len().min(method.len());
        if prefix[..n] == method[..n] {
            if prefix.len() >= method.len() {
                return Some(Protocol::Http);
            }
            incomplete = true;
        }
    }
    if incomplete {
        None
    } else {
        Some(Protocol::Raw)
    }
}

/// Read until the leading bytes are enough to classify the connection.
async fn read_prefix<S>(stream: &mut S) -> io::Result<(Protocol, BytesMut)>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(64);
    loop {
        if stream.read_buf(&mut buf).await? == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        if let Some(protocol) = sniff(&buf) {
            return Ok((protocol, buf));
        }
    }
}

/// A stream that replays already-read bytes before reading from `inner`.
pub struct Rewind<S> {
    prefix: Bytes,
    inner: S,
}

impl<S> Rewind<S> {
    pub fn new(prefix: Bytes, inner: S) -> Self {
        Self { prefix, inner }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Rewind<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.prefix.has_remaining() {
            let n = this.prefix.len().min(buf.remaining());
            buf.put_slice(&this.prefix[..n]);
            this.prefix.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Rewind<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
