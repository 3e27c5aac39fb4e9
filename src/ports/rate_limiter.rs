//! Rate limiting port for protecting ingress.
//!
//! Every limiter is a fixed-window counter: a key may be hit `limit` times
//! per `window`, after which the window's TTL must run out. Limiters share
//! the mechanism and differ only in key namespace and policy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::domain::foundation::{DomainError, ErrorCode, UserId};

/// Which ingress path a counter protects.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitScope {
    /// Chat messages, keyed by user.
    MessageSend,
    /// Outgoing calls, keyed by user.
    CallInitiate,
    /// Login attempts, keyed by client IP.
    AuthAttempt,
    /// WebSocket upgrades, keyed by user.
    WsConnect,
}

impl RateLimitScope {
    pub const USER_SCOPES: [RateLimitScope; 3] = [
        RateLimitScope::MessageSend,
        RateLimitScope::CallInitiate,
        RateLimitScope::WsConnect,
    ];

    /// Key namespace segment.
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitScope::MessageSend => "message",
            RateLimitScope::CallInitiate => "call",
            RateLimitScope::AuthAttempt => "auth",
            RateLimitScope::WsConnect => "ws",
        }
    }
}

impl fmt::Display for RateLimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Key identifying one counter.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct RateLimitKey {
    pub scope: RateLimitScope,
    /// User id or client IP, depending on the scope.
    pub identifier: String,
}

impl RateLimitKey {
    pub fn new(scope: RateLimitScope, identifier: impl Into<String>) -> Self {
        Self {
            scope,
            identifier: identifier.into(),
        }
    }

    pub fn message_send(user_id: &UserId) -> Self {
        Self::new(RateLimitScope::MessageSend, user_id.as_str())
    }

    pub fn call_initiate(user_id: &UserId) -> Self {
        Self::new(RateLimitScope::CallInitiate, user_id.as_str())
    }

    pub fn auth_attempt(ip: &str) -> Self {
        Self::new(RateLimitScope::AuthAttempt, ip)
    }

    pub fn ws_connect(user_id: &UserId) -> Self {
        Self::new(RateLimitScope::WsConnect, user_id.as_str())
    }

    /// Returns the shared-store key for this counter.
    pub fn to_redis_key(&self) -> String {
        format!("ratelimit:{}:{}", self.scope.as_str(), self.identifier)
    }
}

/// Limit and window for one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub limit: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }
}

/// Outcome of a check, consume or status read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the current window expires.
    pub reset_in: Duration,
}

impl RateLimitResult {
    /// Builds a result from the counter value after the operation.
    pub fn from_count(allowed: bool, count: u32, policy: RateLimitPolicy, reset_in: Duration) -> Self {
        Self {
            allowed,
            limit: policy.limit,
            remaining: policy.limit.saturating_sub(count),
            reset_in: reset_in.min(policy.window),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    pub fn is_denied(&self) -> bool {
        !self.allowed
    }

    /// Whole seconds until reset, rounded up so clients never retry early.
    pub fn reset_in_secs(&self) -> u64 {
        let secs = self.reset_in.as_secs();
        if self.reset_in.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}

/// Errors that can occur during rate limiting operations.
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// Rate limiter backend is unavailable.
    #[error("rate limiter unavailable: {0}")]
    Unavailable(String),

    /// Invalid rate limit key provided.
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

impl From<RateLimitError> for DomainError {
    fn from(err: RateLimitError) -> Self {
        let code = match err {
            RateLimitError::Unavailable(_) => ErrorCode::CacheError,
            RateLimitError::InvalidKey(_) => ErrorCode::ValidationFailed,
        };
        DomainError::new(code, err.to_string())
    }
}

/// Port for fixed-window rate limiting.
///
/// `check` must read, compare and increment as one atomic step in the
/// backing store so concurrent requests for one key cannot overshoot.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Increments the counter if under the limit.
    async fn check(&self, key: &RateLimitKey) -> Result<RateLimitResult, RateLimitError>;

    /// Increments the counter unconditionally.
    ///
    /// For check-then-commit flows that only count successful operations.
    async fn consume(&self, key: &RateLimitKey) -> Result<RateLimitResult, RateLimitError>;

    /// Reads the counter without changing it.
    async fn status(&self, key: &RateLimitKey) -> Result<RateLimitResult, RateLimitError>;

    /// Clears the counter (admin operation).
    async fn reset(&self, key: &RateLimitKey) -> Result<(), RateLimitError>;

    async fn allow_message_send(&self, user_id: &UserId) -> Result<RateLimitResult, RateLimitError> {
        self.check(&RateLimitKey::message_send(user_id)).await
    }

    async fn allow_call_initiate(&self, user_id: &UserId) -> Result<RateLimitResult, RateLimitError> {
        self.check(&RateLimitKey::call_initiate(user_id)).await
    }

    async fn allow_auth_attempt(&self, ip: &str) -> Result<RateLimitResult, RateLimitError> {
        self.check(&RateLimitKey::auth_attempt(ip)).await
    }

    async fn allow_ws_connect(&self, user_id: &UserId) -> Result<RateLimitResult, RateLimitError> {
        self.check(&RateLimitKey::ws_connect(user_id)).await
    }

    async fn consume_message_send(&self, user_id: &UserId) -> Result<RateLimitResult, RateLimitError> {
        self.consume(&RateLimitKey::message_send(user_id)).await
    }

    async fn consume_call_initiate(&self, user_id: &UserId) -> Result<RateLimitResult, RateLimitError> {
        self.consume(&RateLimitKey::call_initiate(user_id)).await
    }

    /// Counts a failed login against the client IP.
    async fn consume_auth_attempt(&self, ip: &str) -> Result<RateLimitResult, RateLimitError> {
        self.consume(&RateLimitKey::auth_attempt(ip)).await
    }

    /// Clears every user-keyed counter for `user_id`.
    async fn reset_user(&self, user_id: &UserId) -> Result<(), RateLimitError> {
        for scope in RateLimitScope::USER_SCOPES {
            self.reset(&RateLimitKey::new(scope, user_id.as_str())).await?;
        }
        Ok(())
    }

    /// Clears every IP-keyed counter for `ip`.
    async fn reset_ip(&self, ip: &str) -> Result<(), RateLimitError> {
        self.reset(&RateLimitKey::auth_attempt(ip)).await
    }
}
