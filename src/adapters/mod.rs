//! Adapters - Implementations of port interfaces.
//!
//! - `events` - Outbox processor, event bus and pub/sub transports
//! - `postgres` - Durable outbox store
//! - `presence` / `signaling` / `rate_limiter` - Shared state stores (in-memory, Redis)
//! - `auth` - Session validators (JWT, mock)
//! - `access` - Topic authorization and the default command executor
//! - `websocket` - Connection hub, pumps and upgrade handler
//! - `http` - Health, middleware and the application router

pub mod access;
pub mod auth;
pub mod events;
pub mod http;
pub mod postgres;
pub mod presence;
pub mod rate_limiter;
pub mod signaling;
pub mod websocket;

pub use events::{InMemoryOutboxStore, InMemoryTransport, OutboxProcessor, RedisTransport, TransportEventBus};
