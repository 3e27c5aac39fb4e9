//! PresenceStore port - shared presence state.
//!
//! A store keeps four pieces in step for each user:
//!
//! - the set of live connection ids
//! - the status record (carries its own TTL)
//! - membership in the global online set
//! - a score in the heartbeat index, used to find stale users
//!
//! Every mutating call reports whether it caused a visible transition, so
//! exactly one caller publishes each `presence.changed` event even when
//! several instances race on the same user.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::foundation::{ConnectionId, DeviceId, DomainError, ErrorCode, Timestamp, UserId};
use crate::domain::presence::{PresenceState, PresenceStatus};

/// Result of a presence mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub status: PresenceStatus,
    /// True when this call flipped online/offline or changed the displayed status.
    pub changed: bool,
}

#[derive(Debug, Clone, Error)]
pub enum PresenceError {
    #[error("presence store unavailable: {0}")]
    Unavailable(String),

    #[error("user {0} is not online")]
    NotOnline(UserId),

    #[error("corrupt presence record for {user}: {reason}")]
    Corrupt { user: UserId, reason: String },
}

impl From<PresenceError> for DomainError {
    fn from(err: PresenceError) -> Self {
        let code = match err {
            PresenceError::Unavailable(_) => ErrorCode::CacheError,
            PresenceError::NotOnline(_) => ErrorCode::InvalidStateTransition,
            PresenceError::Corrupt { .. } => ErrorCode::InternalError,
        };
        DomainError::new(code, err.to_string())
    }
}

#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Tracks a new connection; `changed` when it is the user's first.
    async fn add_connection(
        &self,
        user: &UserId,
        device: &DeviceId,
        connection: &ConnectionId,
        now: Timestamp,
    ) -> Result<PresenceUpdate, PresenceError>;

    /// Drops a connection; `changed` when it was the user's last.
    async fn remove_connection(
        &self,
        user: &UserId,
        connection: &ConnectionId,
        now: Timestamp,
    ) -> Result<PresenceUpdate, PresenceError>;

    /// Forgets every connection and marks the user offline.
    async fn mark_offline(&self, user: &UserId, now: Timestamp) -> Result<PresenceUpdate, PresenceError>;

    /// Changes the displayed status of an online user.
    async fn set_status(
        &self,
        user: &UserId,
        status: PresenceState,
        now: Timestamp,
    ) -> Result<PresenceUpdate, PresenceError>;

    /// Refreshes liveness for a connection the caller knows is open.
    ///
    /// Re-tracks the connection and the user's online membership if a
    /// sweep dropped them; `changed` when that brought the user back online.
    async fn touch(
        &self,
        user: &UserId,
        device: &DeviceId,
        connection: &ConnectionId,
        now: Timestamp,
    ) -> Result<PresenceUpdate, PresenceError>;

    /// Reads one record; unknown users are reported offline.
    async fn get(&self, user: &UserId) -> Result<PresenceStatus, PresenceError>;

    /// Reads many records, preserving input order.
    async fn get_many(&self, users: &[UserId]) -> Result<Vec<PresenceStatus>, PresenceError>;

    /// Online users whose last heartbeat is older than `cutoff`.
    async fn stale_users(&self, cutoff: Timestamp) -> Result<Vec<UserId>, PresenceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    fn assert_object_safe(_: &dyn PresenceStore) {}

    #[test]
    fn not_online_maps_to_state_error() {
        let err: DomainError = PresenceError::NotOnline(UserId::new("u1").unwrap()).into();
        assert_eq!(err.code, ErrorCode::InvalidStateTransition);
    }
}
