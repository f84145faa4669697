//! Business-logic capability injected into every session.

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::{Connect, Publish};

/// Failure reported by a [`Handler`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("not authorized")]
    NotAuthorized,
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Strategy deciding what connect, subscribe, unsubscribe and publish mean.
///
/// How a failure reaches the client depends on the call: a failed
/// `on_connect` produces CONNACK 0x05, a failed `on_subscribe` produces 0x80
/// for that filter only, and failures of `on_unsubscribe` and `on_publish`
/// are not reported to the client at all.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn on_connect(&self, connect: &Connect) -> Result<(), HandlerError>;

    async fn on_subscribe(&self, topic: &str) -> Result<(), HandlerError>;

    async fn on_unsubscribe(&self, topic: &str) -> Result<(), HandlerError>;

    async fn on_publish(&self, publish: &Publish) -> Result<(), HandlerError>;
}
