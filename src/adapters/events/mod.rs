//! Event adapters.
//!
//! - `InMemoryTransport` / `RedisTransport` - Pub/sub transports
//! - `TransportEventBus` - Routed publishing and typed local dispatch
//! - `OutboxProcessor` - Background service draining the outbox
//! - `InMemoryOutboxStore` - Outbox store for tests

mod event_bus;
mod in_memory_outbox;
mod in_memory_transport;
mod outbox_processor;
mod redis_transport;

pub use event_bus::{EventBusConfig, EventBusError, TransportEventBus};
pub use in_memory_outbox::InMemoryOutboxStore;
pub use in_memory_transport::InMemoryTransport;
pub use outbox_processor::{BatchReport, OutboxProcessor, OutboxProcessorConfig};
pub use redis_transport::RedisTransport;
