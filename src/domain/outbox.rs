//! Outbox records: durable events awaiting publication and the audit trail
//! of every publish attempt.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

use super::foundation::{Envelope, EventId, Timestamp};

/// Where an outbox event sits in the delivery pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Waiting for its first or next attempt.
    Pending,
    /// Published to every routed topic.
    Processed,
    /// Retry budget exhausted; needs an operator.
    DeadLettered,
}

/// A domain event written to the durable log by business logic.
///
/// Created in the same transaction as the domain write. The processor only
/// ever bumps `retry_count`, moves `next_attempt_at`, and flips the
/// processed/failed markers; rows are never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: EventId,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub payload: JsonValue,
    pub created_at: Timestamp,
    pub retry_count: u32,
    pub next_attempt_at: Timestamp,
    pub processed_at: Option<Timestamp>,
    /// Terminal failure flag (dead-letter).
    pub failed: bool,
    pub last_error: Option<String>,
}

impl OutboxEvent {
    /// Creates a pending event due immediately.
    pub fn new(
        event_type: impl Into<String>,
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        payload: JsonValue,
    ) -> Self {
        let now = Timestamp::now();
        Self {
            id: EventId::new(),
            event_type: event_type.into(),
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            payload,
            created_at: now,
            retry_count: 0,
            next_attempt_at: now,
            processed_at: None,
            failed: false,
            last_error: None,
        }
    }

    pub fn status(&self) -> OutboxStatus {
        if self.processed_at.is_some() {
            OutboxStatus::Processed
        } else if self.failed {
            OutboxStatus::DeadLettered
        } else {
            OutboxStatus::Pending
        }
    }

    /// True when the event should be picked up by a batch fetch at `now`.
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.status() == OutboxStatus::Pending && !self.next_attempt_at.is_after(&now)
    }

    /// Builds the transport envelope; `occurred_at` is the creation time.
    pub fn to_envelope(&self) -> Envelope {
        Envelope {
            event_type: self.event_type.clone(),
            aggregate_type: self.aggregate_type.clone(),
            aggregate_id: self.aggregate_id.clone(),
            occurred_at: self.created_at,
            payload: self.payload.clone(),
        }
    }
}

/// Result of one publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryOutcome {
    Delivered,
    Failed,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Delivered => "DELIVERED",
            DeliveryOutcome::Failed => "FAILED",
        }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only audit row, one per publish attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub event_id: EventId,
    /// 1-based attempt number.
    pub attempt: u32,
    pub outcome: DeliveryOutcome,
    pub error: Option<String>,
    pub attempted_at: Timestamp,
}

impl DeliveryRecord {
    pub fn delivered(event: &OutboxEvent, at: Timestamp) -> Self {
        Self {
            event_id: event.id,
            attempt: event.retry_count + 1,
            outcome: DeliveryOutcome::Delivered,
            error: None,
            attempted_at: at,
        }
    }

    pub fn failed(event: &OutboxEvent, reason: impl Into<String>, at: Timestamp) -> Self {
        Self {
            event_id: event.id,
            attempt: event.retry_count + 1,
            outcome: DeliveryOutcome::Failed,
            error: Some(reason.into()),
            attempted_at: at,
        }
    }
}
