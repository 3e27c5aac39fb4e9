//! OutboxProcessor - Background service for reliable event delivery.
//!
//! This service implements the second half of the Transactional Outbox Pattern:
//! 1. Business logic writes events to the outbox (same transaction as domain changes)
//! 2. **OutboxProcessor polls the outbox, routes, and publishes** ← This module
//!
//! ## Per-event state machine
//!
//! ```text
//! PENDING ──fetch──► attempt ──► PROCESSED
//!                           ├──► FAILED (retryable, +retry_backoff)
//!                           └──► FAILED (terminal, +dead_letter_backoff)
//! ```
//!
//! Every publish attempt appends exactly one delivery record, written
//! before the event's status moves. An event whose retry budget is spent
//! is dead-lettered without another attempt, so it gets no record for that
//! pass. A store error while settling one event is logged and the rest of
//! the batch still runs; only a failed fetch fails the batch.
//!
//! ## Configuration
//!
//! | Setting | Default | Description |
//! |---------|---------|-------------|
//! | `poll_interval` | 2s | How often to check for due events |
//! | `batch_size` | 100 | Max events per poll cycle |
//! | `max_retries` | 5 | Attempts before dead-lettering |
//! | `retry_backoff` | 60s | Delay before a failed event is due again |
//! | `dead_letter_backoff` | 1h | `next_attempt_at` stamped on dead-lettered events |
//!
//! ## Graceful Shutdown
//!
//! The service listens for a shutdown signal and runs one final batch
//! before stopping.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;

use crate::domain::foundation::{DomainError, Timestamp};
use crate::domain::outbox::{DeliveryRecord, OutboxEvent};
use crate::domain::routing::ChannelRouter;
use crate::ports::{OutboxStore, PubSubTransport};

/// Configuration for the OutboxProcessor service.
#[derive(Debug, Clone)]
pub struct OutboxProcessorConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub dead_letter_backoff: Duration,
}

impl Default for OutboxProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            batch_size: 100,
            max_retries: 5,
            retry_backoff: Duration::from_secs(60),
            dead_letter_backoff: Duration::from_secs(3600),
        }
    }
}

impl OutboxProcessorConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_dead_letter_backoff(mut self, backoff: Duration) -> Self {
        self.dead_letter_backoff = backoff;
        self
    }
}

/// Counts for one processed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Events a publish was attempted for; equals delivery records written.
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    pub dead_lettered: usize,
    /// Events whose record or status write failed; they stay due.
    pub store_errors: usize,
}

enum Attempt {
    Delivered,
    Failed(String),
}

/// Background service that drains the outbox into the pub/sub transport.
pub struct OutboxProcessor {
    store: Arc<dyn OutboxStore>,
    transport: Arc<dyn PubSubTransport>,
    router: ChannelRouter,
    config: OutboxProcessorConfig,
}

impl OutboxProcessor {
    pub fn new(store: Arc<dyn OutboxStore>, transport: Arc<dyn PubSubTransport>) -> Self {
        Self::with_config(store, transport, OutboxProcessorConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn OutboxStore>,
        transport: Arc<dyn PubSubTransport>,
        config: OutboxProcessorConfig,
    ) -> Self {
        Self {
            store,
            transport,
            router: ChannelRouter::new(),
            config,
        }
    }

    pub fn config(&self) -> &OutboxProcessorConfig {
        &self.config
    }

    /// Run the processor loop until the shutdown signal is received.
    ///
    /// Batch errors (the store being unreachable, say) are logged and the
    /// loop carries on at the next tick.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "outbox processor started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.tick().await;
                        tracing::info!("outbox processor stopped");
                        return;
                    }
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    async fn tick(&self) {
        match self.process_batch().await {
            Ok(report) if report.attempted > 0 || report.dead_lettered > 0 => {
                tracing::debug!(
                    attempted = report.attempted,
                    delivered = report.delivered,
                    failed = report.failed,
                    dead_lettered = report.dead_lettered,
                    store_errors = report.store_errors,
                    "outbox batch processed"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "outbox batch failed"),
        }
    }

    /// Process a single batch of due events.
    pub async fn process_batch(&self) -> Result<BatchReport, DomainError> {
        let events = self.store.fetch_pending(self.config.batch_size).await?;
        let mut report = BatchReport::default();

        for event in events {
            if event.retry_count >= self.config.max_retries {
                match self.dead_letter(&event).await {
                    Ok(()) => report.dead_lettered += 1,
                    Err(e) => {
                        tracing::error!(event_id = %event.id, error = %e, "failed to dead-letter outbox event");
                        report.store_errors += 1;
                    }
                }
                continue;
            }

            report.attempted += 1;
            let now = Timestamp::now();
            let attempt = self.attempt(&event).await;
            match &attempt {
                Attempt::Delivered => report.delivered += 1,
                Attempt::Failed(reason) => {
                    tracing::warn!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        retry_count = event.retry_count,
                        error = %reason,
                        "outbox publish failed, will retry"
                    );
                    report.failed += 1;
                }
            }

            if let Err(e) = self.settle(&event, attempt, now).await {
                tracing::error!(event_id = %event.id, error = %e, "failed to settle outbox event");
                report.store_errors += 1;
            }
        }

        Ok(report)
    }

    /// Appends the attempt's delivery record, then moves the event's status.
    async fn settle(&self, event: &OutboxEvent, attempt: Attempt, now: Timestamp) -> Result<(), DomainError> {
        match attempt {
            Attempt::Delivered => {
                self.store
                    .record_delivery(DeliveryRecord::delivered(event, now))
                    .await?;
                self.store.mark_processed(event.id).await
            }
            Attempt::Failed(reason) => {
                self.store
                    .record_delivery(DeliveryRecord::failed(event, reason.clone(), now))
                    .await?;
                self.store
                    .mark_failed(event.id, now.plus(self.config.retry_backoff), &reason, false)
                    .await
            }
        }
    }

    /// Run exactly one poll cycle (for testing).
    pub async fn poll_once(&self) -> Result<BatchReport, DomainError> {
        self.process_batch().await
    }

    async fn attempt(&self, event: &OutboxEvent) -> Attempt {
        let envelope = event.to_envelope();
        let bytes = match envelope.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => return Attempt::Failed(format!("encode envelope: {}", e)),
        };

        let mut errors = Vec::new();
        for topic in self.router.resolve(&envelope) {
            if let Err(e) = self.transport.publish(topic.as_str(), bytes.clone()).await {
                errors.push(e.to_string());
            }
        }

        if errors.is_empty() {
            Attempt::Delivered
        } else {
            Attempt::Failed(errors.join("; "))
        }
    }

    async fn dead_letter(&self, event: &OutboxEvent) -> Result<(), DomainError> {
        let reason = format!(
            "retry budget exhausted after {} attempts: {}",
            event.retry_count,
            event.last_error.as_deref().unwrap_or("unknown error")
        );
        tracing::error!(
            event_id = %event.id,
            event_type = %event.event_type,
            aggregate_id = %event.aggregate_id,
            "outbox event dead-lettered"
        );
        let next_attempt_at = Timestamp::now().plus(self.config.dead_letter_backoff);
        self.store
            .mark_failed(event.id, next_attempt_at, &reason, true)
            .await
    }
}
