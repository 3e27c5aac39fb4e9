//! In-memory outbox store for testing.
//!
//! Keeps events in insertion order and the delivery audit trail in a
//! separate list. Uses `.expect()` on lock operations; not for production.

use async_trait::async_trait;
use std::sync::RwLock;

use crate::domain::foundation::{DomainError, ErrorCode, EventId, Timestamp};
use crate::domain::outbox::{DeliveryRecord, OutboxEvent};
use crate::ports::OutboxStore;

#[derive(Default)]
pub struct InMemoryOutboxStore {
    events: RwLock<Vec<OutboxEvent>>,
    deliveries: RwLock<Vec<DeliveryRecord>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event as business logic would.
    pub fn insert(&self, event: OutboxEvent) -> EventId {
        let id = event.id;
        self.events
            .write()
            .expect("InMemoryOutboxStore: events lock poisoned")
            .push(event);
        id
    }

    // === Test Helpers ===

    pub fn get(&self, id: EventId) -> Option<OutboxEvent> {
        self.events
            .read()
            .expect("InMemoryOutboxStore: events lock poisoned")
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    pub fn deliveries(&self) -> Vec<DeliveryRecord> {
        self.deliveries
            .read()
            .expect("InMemoryOutboxStore: deliveries lock poisoned")
            .clone()
    }

    pub fn deliveries_for(&self, id: EventId) -> Vec<DeliveryRecord> {
        self.deliveries()
            .into_iter()
            .filter(|d| d.event_id == id)
            .collect()
    }

    fn update<F>(&self, id: EventId, f: F) -> Result<(), DomainError>
    where
        F: FnOnce(&mut OutboxEvent),
    {
        let mut events = self
            .events
            .write()
            .expect("InMemoryOutboxStore: events lock poisoned");
        let event = events.iter_mut().find(|e| e.id == id).ok_or_else(|| {
            DomainError::new(ErrorCode::EventNotFound, format!("outbox event {} not found", id))
        })?;
        f(event);
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<OutboxEvent>, DomainError> {
        let now = Timestamp::now();
        let mut due: Vec<OutboxEvent> = self
            .events
            .read()
            .expect("InMemoryOutboxStore: events lock poisoned")
            .iter()
            .filter(|e| e.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|e| e.created_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn mark_processed(&self, id: EventId) -> Result<(), DomainError> {
        self.update(id, |event| {
            event.processed_at = Some(Timestamp::now());
            event.last_error = None;
        })
    }

    async fn mark_failed(
        &self,
        id: EventId,
        next_attempt_at: Timestamp,
        reason: &str,
        terminal: bool,
    ) -> Result<(), DomainError> {
        self.update(id, |event| {
            event.retry_count += 1;
            event.next_attempt_at = next_attempt_at;
            event.last_error = Some(reason.to_string());
            event.failed = event.failed || terminal;
        })
    }

    async fn record_delivery(&self, record: DeliveryRecord) -> Result<(), DomainError> {
        self.deliveries
            .write()
            .expect("InMemoryOutboxStore: deliveries lock poisoned")
            .push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::outbox::OutboxStatus;
    use serde_json::json;

    #[tokio::test]
    async fn fetch_pending_skips_future_and_finished_events() {
        let store = InMemoryOutboxStore::new();
        let due = store.insert(OutboxEvent::new("message.created", "message", "m1", json!({})));
        let mut later = OutboxEvent::new("message.created", "message", "m2", json!({}));
        later.next_attempt_at = Timestamp::now().plus_secs(60);
        store.insert(later);
        let done = store.insert(OutboxEvent::new("message.created", "message", "m3", json!({})));
        store.mark_processed(done).await.unwrap();

        let pending = store.fetch_pending(10).await.unwrap();

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, due);
    }

    #[tokio::test]
    async fn terminal_failure_dead_letters() {
        let store = InMemoryOutboxStore::new();
        let id = store.insert(OutboxEvent::new("message.created", "message", "m1", json!({})));

        store
            .mark_failed(id, Timestamp::now(), "exhausted", true)
            .await
            .unwrap();

        let event = store.get(id).unwrap();
        assert_eq!(event.status(), OutboxStatus::DeadLettered);
        assert_eq!(event.retry_count, 1);
        assert!(store.fetch_pending(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn marking_unknown_event_is_not_found() {
        let store = InMemoryOutboxStore::new();

        let err = store.mark_processed(EventId::new()).await.unwrap_err();

        assert_eq!(err.code, ErrorCode::EventNotFound);
    }
}
