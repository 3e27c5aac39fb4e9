//! Foundation module - Shared domain primitives.
//!
//! Contains value objects, identifiers, the transport envelope and error
//! types that form the vocabulary of the real-time backbone.

mod auth;
mod envelope;
mod errors;
mod ids;
mod state_machine;
mod timestamp;

pub use auth::{AuthError, AuthenticatedUser};
pub use envelope::{Envelope, EnvelopeHeader};
pub use errors::{DomainError, ErrorCode, ValidationError};
pub use ids::{CallId, ConnectionId, ConversationId, DeviceId, EventId, SessionId, UserId};
pub use state_machine::StateMachine;
pub use timestamp::Timestamp;
