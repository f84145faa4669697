//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the Axum Router whose single route upgrades to WebSocket
//! - Serve one sniffed HTTP connection with hyper, upgrades enabled
//! - Hand upgraded sockets to the accept callback as byte-stream transports

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    response::Response,
    routing::any,
    Extension, Router,
};
use hyper::server::conn::http1;
use hyper_util::{rt::TokioIo, service::TowerToHyperService};
use tokio::io::{AsyncRead, AsyncWrite};
use tower_http::trace::TraceLayer;

use crate::http::websocket::WsTransport;
use crate::net::listener::{Accept, Origin};

/// WebSocket subprotocol offered to clients.
pub const MQTT_SUBPROTOCOL: &str = "mqtt";

/// Build the Axum router with all middleware layers.
pub fn build_router(acceptor: Arc<dyn Accept>) -> Router {
    Router::new()
        .route("/{*path}", any(upgrade_handler))
        .route("/", any(upgrade_handler))
        .with_state(acceptor)
        .layer(TraceLayer::new_for_http())
}

/// Serve one HTTP/1.1 connection that the listener classified as HTTP.
pub async fn serve_connection<S>(
    io: S,
    peer: SocketAddr,
    router: Router,
) -> Result<(), hyper::Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let app = router.layer(Extension(ConnectInfo(peer)));
    http1::Builder::new()
        .serve_connection(TokioIo::new(io), TowerToHyperService::new(app))
        .with_upgrades()
        .await
}

/// Upgrade handler.
/// Requests that are not WebSocket upgrades are refused by the extractor.
async fn upgrade_handler(
    State(acceptor): State<Arc<dyn Accept>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    tracing::debug!(peer_addr = %peer, "Upgrading HTTP request to WebSocket");
    ws.protocols([MQTT_SUBPROTOCOL])
        .on_failed_upgrade(move |err| {
            tracing::debug!(peer_addr = %peer, error = %err, "WebSocket upgrade failed");
        })
        .on_upgrade(move |socket| async move {
            acceptor.on_accept(Box::new(WsTransport::new(socket)), peer, Origin::WebSocket);
        })
}
