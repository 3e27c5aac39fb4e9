//! Call store adapters.

mod in_memory;
mod redis;

pub use in_memory::InMemoryCallStore;
pub use redis::RedisCallStore;
