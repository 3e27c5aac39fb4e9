//! CallStore port - TTL-bounded call state and trickle-ICE replay lists.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::time::Duration;
use thiserror::Error;

use crate::domain::call::CallState;
use crate::domain::foundation::{CallId, DomainError, ErrorCode, UserId};

#[derive(Debug, Clone, Error)]
pub enum SignalingError {
    #[error("call store unavailable: {0}")]
    Unavailable(String),

    #[error("call {0} not found")]
    CallNotFound(CallId),

    #[error("corrupt call record {call_id}: {reason}")]
    Corrupt { call_id: CallId, reason: String },

    /// The mutation refused the transition; nothing was written.
    #[error(transparent)]
    Rejected(DomainError),
}

impl From<SignalingError> for DomainError {
    fn from(err: SignalingError) -> Self {
        let code = match &err {
            SignalingError::Rejected(inner) => return inner.clone(),
            SignalingError::Unavailable(_) => ErrorCode::CacheError,
            SignalingError::CallNotFound(_) => ErrorCode::CallNotFound,
            SignalingError::Corrupt { .. } => ErrorCode::InternalError,
        };
        DomainError::new(code, err.to_string())
    }
}

/// A transition applied to the current stored state.
///
/// May run more than once when a store retries after a conflicting write;
/// each run sees a freshly loaded state.
pub type CallMutation<'a> = &'a (dyn Fn(&mut CallState) -> Result<(), DomainError> + Send + Sync);

/// Shared storage for call signaling.
///
/// Every write refreshes a TTL so abandoned calls disappear on their own.
#[async_trait]
pub trait CallStore: Send + Sync {
    /// Stores a new call. Existing state for the same id is replaced.
    async fn save(&self, call: &CallState, ttl: Duration) -> Result<(), SignalingError>;

    /// Returns `None` for unknown or expired calls.
    async fn load(&self, call_id: &CallId) -> Result<Option<CallState>, SignalingError>;

    /// Atomically loads, mutates and stores a call.
    ///
    /// Concurrent updates to the same call never overwrite each other.
    /// Fails with `CallNotFound` for unknown or expired calls and with
    /// `Rejected` when the mutation errors.
    async fn update(
        &self,
        call_id: &CallId,
        ttl: Duration,
        mutate: CallMutation<'_>,
    ) -> Result<CallState, SignalingError>;

    /// Appends a candidate to the `(call, from, to)` list, keeping the newest `cap`.
    async fn append_ice(
        &self,
        call_id: &CallId,
        from: &UserId,
        to: &UserId,
        candidate: &JsonValue,
        cap: usize,
        ttl: Duration,
    ) -> Result<(), SignalingError>;

    /// Candidates sent from `from` to `to`, oldest first.
    async fn ice_candidates(
        &self,
        call_id: &CallId,
        from: &UserId,
        to: &UserId,
    ) -> Result<Vec<JsonValue>, SignalingError>;
}
