//! Presence store adapters.
//!
//! - `InMemoryPresenceStore` - In-process for testing
//! - `RedisPresenceStore` - Shared across instances

mod in_memory;
mod redis;

pub use in_memory::InMemoryPresenceStore;
pub use redis::RedisPresenceStore;
