//! CommandExecutor port - hands client commands to business logic.
//!
//! Frames the WebSocket layer does not handle itself (sending, editing and
//! deleting messages, and so on) become a [`Command`]. The business layer
//! validates and persists them, typically appending outbox events in the
//! same transaction.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::domain::foundation::{AuthenticatedUser, ConnectionId, DomainError};

/// A command parsed from an inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// The frame `type`, e.g. `message.send`.
    pub name: String,
    pub request_id: String,
    pub issuer: AuthenticatedUser,
    pub connection_id: ConnectionId,
    pub payload: JsonValue,
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Executes a command and returns the response payload.
    async fn execute(&self, command: Command) -> Result<JsonValue, DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    fn assert_object_safe(_: &dyn CommandExecutor) {}
}
