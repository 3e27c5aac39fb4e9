//! Redis pub/sub transport for multi-instance deployments.
//!
//! Publishing shares one multiplexed connection. Each pattern subscription
//! opens its own dedicated pub/sub connection, which is closed when the
//! returned stream is dropped.

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use crate::ports::{MessageStream, PubSubTransport, TransportError, TransportMessage};

#[derive(Clone)]
pub struct RedisTransport {
    client: redis::Client,
    conn: MultiplexedConnection,
}

impl RedisTransport {
    /// Connects to Redis. Failure here is fatal to startup.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let client =
            redis::Client::open(url).map_err(|e| TransportError::Unavailable(e.to_string()))?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        Ok(Self { client, conn })
    }

    /// Builds a transport from an existing client and connection.
    pub fn new(client: redis::Client, conn: MultiplexedConnection) -> Self {
        Self { client, conn }
    }
}

#[async_trait]
impl PubSubTransport for RedisTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let mut conn = self.conn.clone();
        let receivers: i64 = conn
            .publish(topic, payload)
            .await
            .map_err(|e: redis::RedisError| TransportError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        tracing::trace!(topic, receivers, "published");
        Ok(())
    }

    async fn psubscribe(&self, pattern: &str) -> Result<MessageStream, TransportError> {
        let subscribe_error = |e: redis::RedisError| TransportError::Subscribe {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        };

        let mut pubsub = self
            .client
            .get_async_connection()
            .await
            .map_err(subscribe_error)?
            .into_pubsub();
        pubsub.psubscribe(pattern).await.map_err(subscribe_error)?;
        tracing::info!(pattern, "pattern subscription established");

        let stream = pubsub.into_on_message().map(|msg| TransportMessage {
            channel: msg.get_channel_name().to_string(),
            payload: msg.get_payload_bytes().to_vec(),
        });
        Ok(stream.boxed())
    }
}
