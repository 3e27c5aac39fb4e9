//! PostgreSQL adapters.
//!
//! Only the durable outbox lives in Postgres; live state (presence,
//! counters, call state) is in Redis.

mod outbox_store;

pub use outbox_store::PostgresOutboxStore;
