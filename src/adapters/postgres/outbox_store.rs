//! PostgreSQL implementation of OutboxStore.
//!
//! Events live in `outbox_events`; every publish attempt appends a row to
//! `outbox_deliveries`. Neither table is ever deleted from here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::foundation::{DomainError, ErrorCode, EventId, Timestamp};
use crate::domain::outbox::{DeliveryRecord, OutboxEvent};
use crate::ports::OutboxStore;

pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the bundled schema migrations.
    pub async fn migrate(&self) -> Result<(), DomainError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DomainError::new(ErrorCode::DatabaseError, format!("migration failed: {}", e)))
    }

    /// Writes an event on the caller's transaction so it commits together
    /// with the business change that produced it.
    pub async fn enqueue(
        tx: &mut Transaction<'_, Postgres>,
        event: &OutboxEvent,
    ) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO outbox_events (
                id, event_type, aggregate_type, aggregate_id, payload,
                created_at, retry_count, next_attempt_at, processed_at, failed, last_error
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(&event.event_type)
        .bind(&event.aggregate_type)
        .bind(&event.aggregate_id)
        .bind(&event.payload)
        .bind(event.created_at.as_datetime())
        .bind(event.retry_count as i32)
        .bind(event.next_attempt_at.as_datetime())
        .bind(event.processed_at.map(|t| *t.as_datetime()))
        .bind(event.failed)
        .bind(&event.last_error)
        .execute(&mut **tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OutboxRow {
    id: Uuid,
    event_type: String,
    aggregate_type: String,
    aggregate_id: String,
    payload: JsonValue,
    created_at: DateTime<Utc>,
    retry_count: i32,
    next_attempt_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    failed: bool,
    last_error: Option<String>,
}

impl From<OutboxRow> for OutboxEvent {
    fn from(row: OutboxRow) -> Self {
        OutboxEvent {
            id: EventId::from_uuid(row.id),
            event_type: row.event_type,
            aggregate_type: row.aggregate_type,
            aggregate_id: row.aggregate_id,
            payload: row.payload,
            created_at: Timestamp::from_datetime(row.created_at),
            retry_count: row.retry_count.max(0) as u32,
            next_attempt_at: Timestamp::from_datetime(row.next_attempt_at),
            processed_at: row.processed_at.map(Timestamp::from_datetime),
            failed: row.failed,
            last_error: row.last_error,
        }
    }
}

fn db_error(e: sqlx::Error) -> DomainError {
    DomainError::new(ErrorCode::DatabaseError, format!("Database error: {}", e))
}

fn not_found(id: EventId) -> DomainError {
    DomainError::new(ErrorCode::EventNotFound, format!("outbox event {} not found", id))
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<OutboxEvent>, DomainError> {
        let rows: Vec<OutboxRow> = sqlx::query_as(
            r#"
            SELECT id, event_type, aggregate_type, aggregate_id, payload,
                   created_at, retry_count, next_attempt_at, processed_at, failed, last_error
            FROM outbox_events
            WHERE processed_at IS NULL
              AND failed = FALSE
              AND next_attempt_at <= NOW()
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows.into_iter().map(OutboxEvent::from).collect())
    }

    async fn mark_processed(&self, id: EventId) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET processed_at = NOW(), last_error = NULL
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(not_found(id));
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: EventId,
        next_attempt_at: Timestamp,
        reason: &str,
        terminal: bool,
    ) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET retry_count = retry_count + 1,
                next_attempt_at = $2,
                last_error = $3,
                failed = failed OR $4
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(next_attempt_at.as_datetime())
        .bind(reason)
        .bind(terminal)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(not_found(id));
        }
        Ok(())
    }

    async fn record_delivery(&self, record: DeliveryRecord) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO outbox_deliveries (event_id, attempt, outcome, error, attempted_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.event_id.as_uuid())
        .bind(record.attempt as i32)
        .bind(record.outcome.as_str())
        .bind(&record.error)
        .bind(record.attempted_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }
}
