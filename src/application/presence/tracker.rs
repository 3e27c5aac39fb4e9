//! PresenceTracker - online/offline bookkeeping and `presence.changed` events.
//!
//! A user is online while at least one connection is tracked for them.
//! The store reports which call caused a transition; only that call
//! publishes, so each transition yields exactly one event.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::foundation::{ConnectionId, DeviceId, DomainError, Envelope, Timestamp, UserId};
use crate::domain::presence::{PresenceState, PresenceStatus};
use crate::domain::realtime_event::event_types;
use crate::ports::{EventPublisher, PresenceStore, PresenceUpdate};

pub struct PresenceTracker {
    store: Arc<dyn PresenceStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn PresenceStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { store, publisher }
    }

    /// Tracks a new connection. The user's first connection publishes.
    pub async fn set_online(
        &self,
        user: &UserId,
        device: &DeviceId,
        connection: &ConnectionId,
    ) -> Result<PresenceStatus, DomainError> {
        let update = self
            .store
            .add_connection(user, device, connection, Timestamp::now())
            .await?;
        Ok(self.publish_if_changed(update).await)
    }

    /// Drops one connection. The user's last connection publishes.
    pub async fn connection_closed(
        &self,
        user: &UserId,
        connection: &ConnectionId,
    ) -> Result<PresenceStatus, DomainError> {
        let update = self
            .store
            .remove_connection(user, connection, Timestamp::now())
            .await?;
        Ok(self.publish_if_changed(update).await)
    }

    /// Forces a user offline regardless of open connections.
    pub async fn set_offline(&self, user: &UserId) -> Result<PresenceStatus, DomainError> {
        let update = self.store.mark_offline(user, Timestamp::now()).await?;
        Ok(self.publish_if_changed(update).await)
    }

    /// Changes the displayed status of an online user.
    ///
    /// Going offline is a connection event, not a status choice.
    pub async fn update_status(
        &self,
        user: &UserId,
        status: PresenceState,
    ) -> Result<PresenceStatus, DomainError> {
        if status == PresenceState::Offline {
            return Err(DomainError::validation(
                "status",
                "offline cannot be set explicitly; close the connection instead",
            ));
        }
        let update = self.store.set_status(user, status, Timestamp::now()).await?;
        Ok(self.publish_if_changed(update).await)
    }

    /// Refreshes liveness for an open connection.
    ///
    /// A user swept offline while this connection stayed open comes back
    /// online here and the transition is published.
    pub async fn heartbeat(
        &self,
        user: &UserId,
        device: &DeviceId,
        connection: &ConnectionId,
    ) -> Result<PresenceStatus, DomainError> {
        let update = self
            .store
            .touch(user, device, connection, Timestamp::now())
            .await?;
        if update.changed {
            tracing::info!(user_id = %user, connection_id = %connection, "heartbeat restored swept presence");
        }
        Ok(self.publish_if_changed(update).await)
    }

    pub async fn get_presence(&self, user: &UserId) -> Result<PresenceStatus, DomainError> {
        Ok(self.store.get(user).await?)
    }

    pub async fn get_multiple_presence(&self, users: &[UserId]) -> Result<Vec<PresenceStatus>, DomainError> {
        Ok(self.store.get_many(users).await?)
    }

    /// Flips users with no heartbeat for longer than `max_age` offline.
    ///
    /// Returns the users this sweep took offline. A user another instance
    /// already swept is skipped without an event.
    pub async fn cleanup_stale_presence(&self, max_age: Duration) -> Result<Vec<UserId>, DomainError> {
        let now = Timestamp::now();
        let cutoff = now.minus(max_age);
        let stale = self.store.stale_users(cutoff).await?;

        let mut swept = Vec::new();
        for user in stale {
            match self.store.mark_offline(&user, now).await {
                Ok(update) => {
                    if update.changed {
                        swept.push(user.clone());
                    }
                    self.publish_if_changed(update).await;
                }
                Err(e) => tracing::warn!(user_id = %user, error = %e, "failed to sweep stale presence"),
            }
        }

        if !swept.is_empty() {
            tracing::info!(count = swept.len(), "stale presence swept");
        }
        Ok(swept)
    }

    async fn publish_if_changed(&self, update: PresenceUpdate) -> PresenceStatus {
        if update.changed {
            let status = &update.status;
            match serde_json::to_value(status.to_changed_event()) {
                Ok(payload) => {
                    let envelope = Envelope::new(
                        event_types::PRESENCE_CHANGED,
                        "presence",
                        status.user_id.as_str(),
                        payload,
                    );
                    if let Err(e) = self.publisher.publish(envelope).await {
                        tracing::warn!(user_id = %status.user_id, error = %e, "failed to publish presence change");
                    }
                }
                Err(e) => tracing::error!(error = %e, "failed to encode presence change"),
            }
        }
        update.status
    }
}
