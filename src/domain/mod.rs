//! Domain layer: pure types and rules with no I/O.
//!
//! # Module Organization
//!
//! - `foundation` - Identifiers, timestamps, the wire envelope and errors
//! - `routing` - Topic names and the event-to-topic router
//! - `outbox` - Durable outbox events and delivery audit records
//! - `realtime_event` - Typed decode of bus payloads
//! - `presence` - Presence status vocabulary
//! - `call` - Call state machine and signaling payloads

pub mod call;
pub mod foundation;
pub mod outbox;
pub mod presence;
pub mod realtime_event;
pub mod routing;
