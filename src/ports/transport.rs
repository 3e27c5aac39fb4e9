//! PubSubTransport port - raw topic publish and pattern subscription.
//!
//! The transport moves opaque bytes. Envelope encoding, routing and
//! handler dispatch live above it in the event bus.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::domain::foundation::{DomainError, ErrorCode};

/// One message received through a pattern subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportMessage {
    /// Concrete channel the message was published on.
    pub channel: String,
    pub payload: Vec<u8>,
}

/// Stream of messages for a live subscription.
///
/// Dropping the stream releases the subscription.
pub type MessageStream = BoxStream<'static, TransportMessage>;

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("subscribe to {pattern} failed: {reason}")]
    Subscribe { pattern: String, reason: String },
}

impl From<TransportError> for DomainError {
    fn from(err: TransportError) -> Self {
        DomainError::new(ErrorCode::TransportError, err.to_string())
    }
}

/// Publish/subscribe transport shared by every process instance.
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    /// Publishes `payload` on a single topic.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Subscribes to every topic matching a glob pattern such as `channel:*`.
    async fn psubscribe(&self, pattern: &str) -> Result<MessageStream, TransportError>;
}
