//! Command executor used when no business backend is wired in.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::domain::foundation::{DomainError, ErrorCode};
use crate::ports::{Command, CommandExecutor};

/// Rejects every command with `UNKNOWN_COMMAND`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedCommandExecutor;

#[async_trait]
impl CommandExecutor for UnsupportedCommandExecutor {
    async fn execute(&self, command: Command) -> Result<JsonValue, DomainError> {
        tracing::debug!(command = %command.name, user_id = %command.issuer.id, "no executor for command");
        Err(DomainError::new(
            ErrorCode::UnknownCommand,
            format!("Unsupported command: {}", command.name),
        )
        .with_detail("type", command.name))
    }
}
