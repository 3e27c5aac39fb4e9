//! OutboxStore port - the durable event log the outbox processor drains.
//!
//! Business logic appends events in the same transaction as its domain
//! write (see `PostgresOutboxStore::enqueue`). The processor then:
//!
//! 1. fetches due events (`fetch_pending`)
//! 2. publishes each one
//! 3. marks it processed or failed and appends a delivery record

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, EventId, Timestamp};
use crate::domain::outbox::{DeliveryRecord, OutboxEvent};

/// Port for the transactional outbox table.
///
/// Implementations must:
/// - return only events that are not processed, not dead-lettered, and
///   whose `next_attempt_at` has passed, oldest first
/// - increment `retry_count` on every `mark_failed`
/// - never delete rows
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Returns up to `limit` due events ordered by creation time.
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<OutboxEvent>, DomainError>;

    /// Marks an event as published.
    async fn mark_processed(&self, id: EventId) -> Result<(), DomainError>;

    /// Records a failed attempt and schedules the next one.
    ///
    /// With `terminal` set the event is dead-lettered and will not be
    /// fetched again.
    async fn mark_failed(
        &self,
        id: EventId,
        next_attempt_at: Timestamp,
        reason: &str,
        terminal: bool,
    ) -> Result<(), DomainError>;

    /// Appends one row to the delivery audit trail.
    async fn record_delivery(&self, record: DeliveryRecord) -> Result<(), DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    fn assert_object_safe(_: &dyn OutboxStore) {}

    #[allow(dead_code)]
    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn outbox_store_is_send_sync() {
        #[allow(dead_code)]
        fn check<T: OutboxStore>() {
            assert_send_sync::<T>();
        }
    }
}
