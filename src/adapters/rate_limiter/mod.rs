//! Fixed-window limiters behind the `RateLimiter` port.
//!
//! Both adapters count per `RateLimitKey` and open a fresh window on the
//! first hit after expiry. [`RedisRateLimiter`] runs check-and-increment as
//! one Lua script so concurrent instances share quotas;
//! [`InMemoryRateLimiter`] serves tests and single-node development.
//! Limits per scope come from [`RateLimitConfig`].

mod config;
mod in_memory;
mod redis;

pub use config::{RateLimitConfig, ScopeLimits};
pub use in_memory::InMemoryRateLimiter;
pub use redis::RedisRateLimiter;
