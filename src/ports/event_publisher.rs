//! EventPublisher port - Interface for publishing envelopes to their topics.
//!
//! Publishers do not choose topics; the implementation routes each
//! envelope through the channel router.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, Envelope};

/// Port for publishing events.
///
/// Delivery is at-least-once; handlers may see duplicates.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a single event to every topic it routes to.
    async fn publish(&self, event: Envelope) -> Result<(), DomainError>;

    /// Publish several events in order, stopping at the first failure.
    async fn publish_all(&self, events: Vec<Envelope>) -> Result<(), DomainError> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }
}
