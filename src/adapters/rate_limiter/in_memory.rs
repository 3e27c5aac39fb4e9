//! In-memory rate limiter implementation for testing and development.
//!
//! Uses a fixed-window counter per key in a HashMap; expired windows are
//! dropped on the next hit. Not suitable for multi-instance deployments.
//! Windows are timed with `tokio::time::Instant` so tests can drive them
//! with a paused clock.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::ports::{RateLimitError, RateLimitKey, RateLimitResult, RateLimiter};

use super::config::RateLimitConfig;

#[derive(Debug)]
pub struct InMemoryRateLimiter {
    config: RateLimitConfig,
    windows: Arc<RwLock<HashMap<String, WindowState>>>,
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    count: u32,
    expires_at: Instant,
}

impl InMemoryRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RateLimitConfig::default())
    }

    /// Counts `key` under its policy; `gate` decides whether to refuse at the limit.
    async fn hit(&self, key: &RateLimitKey, gate: bool) -> RateLimitResult {
        let policy = self.config.policy_for(key.scope);
        let now = Instant::now();

        let mut windows = self.windows.write().await;
        windows.retain(|_, state| now < state.expires_at);
        let state = windows
            .entry(key.to_redis_key())
            .or_insert(WindowState {
                count: 0,
                expires_at: now + policy.window,
            });

        let reset_in = state.expires_at.saturating_duration_since(now);
        if gate && state.count >= policy.limit {
            return RateLimitResult::from_count(false, state.count, policy, reset_in);
        }

        state.count += 1;
        RateLimitResult::from_count(true, state.count, policy, reset_in)
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check(&self, key: &RateLimitKey) -> Result<RateLimitResult, RateLimitError> {
        Ok(self.hit(key, true).await)
    }

    async fn consume(&self, key: &RateLimitKey) -> Result<RateLimitResult, RateLimitError> {
        Ok(self.hit(key, false).await)
    }

    async fn status(&self, key: &RateLimitKey) -> Result<RateLimitResult, RateLimitError> {
        let policy = self.config.policy_for(key.scope);
        let now = Instant::now();
        let windows = self.windows.read().await;

        let result = match windows.get(&key.to_redis_key()) {
            Some(state) if now < state.expires_at => {
                let reset_in = state.expires_at.saturating_duration_since(now);
                RateLimitResult::from_count(state.count < policy.limit, state.count, policy, reset_in)
            }
            _ => RateLimitResult::from_count(true, 0, policy, policy.window),
        };
        Ok(result)
    }

    async fn reset(&self, key: &RateLimitKey) -> Result<(), RateLimitError> {
        self.windows.write().await.remove(&key.to_redis_key());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::rate_limiter::ScopeLimits;
    use crate::domain::foundation::UserId;
    use std::time::Duration;

    fn test_user_id() -> UserId {
        UserId::new("user-123").unwrap()
    }

    fn limiter_with_message_limit(limit: u32) -> InMemoryRateLimiter {
        let mut config = RateLimitConfig::default();
        config.message_send = ScopeLimits::per_minute(limit);
        InMemoryRateLimiter::new(config)
    }

    #[tokio::test]
    async fn allows_requests_within_limit() {
        let limiter = limiter_with_message_limit(3);
        let user = test_user_id();

        for expected_remaining in [2, 1, 0] {
            let result = limiter.allow_message_send(&user).await.unwrap();
            assert!(result.is_allowed());
            assert_eq!(result.remaining, expected_remaining);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn expired_windows_are_dropped() {
        let limiter = limiter_with_message_limit(5);
        for id in ["a", "b", "c"] {
            limiter.allow_message_send(&UserId::new(id).unwrap()).await.unwrap();
        }
        assert_eq!(limiter.windows.read().await.len(), 3);

        tokio::time::advance(Duration::from_secs(61)).await;
        limiter.allow_message_send(&test_user_id()).await.unwrap();

        assert_eq!(limiter.windows.read().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn denies_past_limit_until_window_elapses() {
        let limiter = limiter_with_message_limit(2);
        let user = test_user_id();
        limiter.allow_message_send(&user).await.unwrap();
        limiter.allow_message_send(&user).await.unwrap();

        let denied = limiter.allow_message_send(&user).await.unwrap();
        assert!(denied.is_denied());
        assert_eq!(denied.remaining, 0);
        assert!(denied.reset_in <= Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(61)).await;

        let allowed = limiter.allow_message_send(&user).await.unwrap();
        assert!(allowed.is_allowed());
        assert_eq!(allowed.remaining, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn status_does_not_increment() {
        let limiter = limiter_with_message_limit(5);
        let key = RateLimitKey::message_send(&test_user_id());
        limiter.check(&key).await.unwrap();

        let first = limiter.status(&key).await.unwrap();
        let second = limiter.status(&key).await.unwrap();

        assert_eq!(first.remaining, 4);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn consume_counts_past_the_limit() {
        let limiter = limiter_with_message_limit(1);
        let user = test_user_id();

        limiter.consume_message_send(&user).await.unwrap();
        let second = limiter.consume_message_send(&user).await.unwrap();

        assert!(second.is_allowed());
        assert_eq!(second.remaining, 0);
        assert!(limiter.allow_message_send(&user).await.unwrap().is_denied());
    }

    #[tokio::test]
    async fn reset_user_clears_every_user_scope() {
        let limiter = InMemoryRateLimiter::with_defaults();
        let user = test_user_id();
        limiter.allow_message_send(&user).await.unwrap();
        limiter.allow_call_initiate(&user).await.unwrap();

        limiter.reset_user(&user).await.unwrap();

        assert_eq!(limiter.status(&RateLimitKey::message_send(&user)).await.unwrap().remaining, 60);
        assert_eq!(limiter.status(&RateLimitKey::call_initiate(&user)).await.unwrap().remaining, 10);
    }

    #[tokio::test]
    async fn different_ips_have_independent_limits() {
        let limiter = InMemoryRateLimiter::with_defaults();
        for _ in 0..5 {
            limiter.allow_auth_attempt("10.0.0.1").await.unwrap();
        }

        assert!(limiter.allow_auth_attempt("10.0.0.1").await.unwrap().is_denied());
        assert!(limiter.allow_auth_attempt("10.0.0.2").await.unwrap().is_allowed());

        limiter.reset_ip("10.0.0.1").await.unwrap();
        assert!(limiter.allow_auth_attempt("10.0.0.1").await.unwrap().is_allowed());
    }
}
