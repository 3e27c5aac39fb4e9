//! Redis-backed rate limiter implementation for production deployments.
//!
//! Fixed-window counters shared by every instance. The check runs as one
//! Lua script so the read, the comparison and the increment cannot
//! interleave with another request for the same key.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};

use crate::ports::{RateLimitError, RateLimitKey, RateLimitPolicy, RateLimitResult, RateLimiter};

use super::config::RateLimitConfig;

/// KEYS[1] counter, ARGV[1] limit, ARGV[2] window ms.
/// Returns {allowed, count, pttl}.
static CHECK_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local current = tonumber(redis.call('GET', KEYS[1]) or '0')
        local limit = tonumber(ARGV[1])
        local window = tonumber(ARGV[2])
        if current >= limit then
            local ttl = redis.call('PTTL', KEYS[1])
            if ttl < 0 then
                redis.call('PEXPIRE', KEYS[1], window)
                ttl = window
            end
            return {0, current, ttl}
        end
        local count = redis.call('INCR', KEYS[1])
        local ttl = redis.call('PTTL', KEYS[1])
        if count == 1 or ttl < 0 then
            redis.call('PEXPIRE', KEYS[1], window)
            ttl = window
        end
        return {1, count, ttl}
        "#,
    )
});

/// KEYS[1] counter, ARGV[1] window ms. Returns {count, pttl}.
static CONSUME_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local count = redis.call('INCR', KEYS[1])
        local ttl = redis.call('PTTL', KEYS[1])
        if count == 1 or ttl < 0 then
            redis.call('PEXPIRE', KEYS[1], ARGV[1])
            ttl = tonumber(ARGV[1])
        end
        return {count, ttl}
        "#,
    )
});

#[derive(Clone)]
pub struct RedisRateLimiter {
    conn: MultiplexedConnection,
    config: RateLimitConfig,
}

impl RedisRateLimiter {
    pub fn new(conn: MultiplexedConnection, config: RateLimitConfig) -> Self {
        Self { conn, config }
    }

    fn policy_for(&self, key: &RateLimitKey) -> RateLimitPolicy {
        self.config.policy_for(key.scope)
    }
}

fn unavailable(e: redis::RedisError) -> RateLimitError {
    RateLimitError::Unavailable(e.to_string())
}

/// PTTL reply to a duration; missing or persistent keys report the full window.
fn reset_from_pttl(pttl: i64, window: Duration) -> Duration {
    if pttl > 0 {
        Duration::from_millis(pttl as u64)
    } else {
        window
    }
}

fn window_ms(policy: &RateLimitPolicy) -> u64 {
    (policy.window.as_millis() as u64).max(1)
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check(&self, key: &RateLimitKey) -> Result<RateLimitResult, RateLimitError> {
        let policy = self.policy_for(key);
        let mut conn = self.conn.clone();

        let (allowed, count, pttl): (i64, i64, i64) = CHECK_SCRIPT
            .key(key.to_redis_key())
            .arg(policy.limit)
            .arg(window_ms(&policy))
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;

        let result = RateLimitResult::from_count(
            allowed == 1,
            count.max(0) as u32,
            policy,
            reset_from_pttl(pttl, policy.window),
        );
        if result.is_denied() {
            tracing::debug!(key = %key.to_redis_key(), limit = policy.limit, "rate limit exceeded");
        }
        Ok(result)
    }

    async fn consume(&self, key: &RateLimitKey) -> Result<RateLimitResult, RateLimitError> {
        let policy = self.policy_for(key);
        let mut conn = self.conn.clone();

        let (count, pttl): (i64, i64) = CONSUME_SCRIPT
            .key(key.to_redis_key())
            .arg(window_ms(&policy))
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;

        Ok(RateLimitResult::from_count(
            true,
            count.max(0) as u32,
            policy,
            reset_from_pttl(pttl, policy.window),
        ))
    }

    async fn status(&self, key: &RateLimitKey) -> Result<RateLimitResult, RateLimitError> {
        let policy = self.policy_for(key);
        let redis_key = key.to_redis_key();
        let mut conn = self.conn.clone();

        let (count, pttl): (Option<i64>, i64) = redis::pipe()
            .get(&redis_key)
            .pttl(&redis_key)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;

        let count = count.unwrap_or(0).max(0) as u32;
        Ok(RateLimitResult::from_count(
            count < policy.limit,
            count,
            policy,
            reset_from_pttl(pttl, policy.window),
        ))
    }

    async fn reset(&self, key: &RateLimitKey) -> Result<(), RateLimitError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key.to_redis_key())
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
