//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the core and the outside world. Adapters implement these ports.
//!
//! ## Event Ports
//!
//! - `OutboxStore` - Durable event log drained by the outbox processor
//! - `PubSubTransport` - Raw topic publish and pattern subscription
//! - `EventPublisher` - Routed envelope publishing
//! - `EventSubscriber` / `EventHandler` - Local typed dispatch
//!
//! ## Shared State Ports
//!
//! - `RateLimiter` - Fixed-window ingress counters
//! - `PresenceStore` - Online set, heartbeat index and status records
//! - `CallStore` - Call state and ICE replay lists
//!
//! ## Collaborator Ports
//!
//! - `SessionValidator` - Token to identity resolution
//! - `CommandExecutor` - Business command execution
//! - `TopicAuthorizer` - Subscription authorization

mod call_store;
mod command_executor;
mod event_publisher;
mod event_subscriber;
mod outbox_store;
mod presence_store;
mod rate_limiter;
mod session_validator;
mod topic_authorizer;
mod transport;

pub use call_store::{CallMutation, CallStore, SignalingError};
pub use command_executor::{Command, CommandExecutor};
pub use event_publisher::EventPublisher;
pub use event_subscriber::{Delivery, EventHandler, EventSubscriber};
pub use outbox_store::OutboxStore;
pub use presence_store::{PresenceError, PresenceStore, PresenceUpdate};
pub use rate_limiter::{
    RateLimitError, RateLimitKey, RateLimitPolicy, RateLimitResult, RateLimitScope, RateLimiter,
};
pub use session_validator::SessionValidator;
pub use topic_authorizer::{is_own_topic, TopicAuthorizer};
pub use transport::{MessageStream, PubSubTransport, TransportError, TransportMessage};
