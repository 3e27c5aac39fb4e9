//! Connection identity.
//!
//! A bearer token resolves to a user, the login session it belongs to and
//! the device it was issued for. Resolution happens behind the
//! `SessionValidator` port.

use super::{DeviceId, SessionId, UserId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: UserId,
    pub session_id: SessionId,
    pub device_id: DeviceId,
}

impl AuthenticatedUser {
    pub fn new(id: UserId, session_id: SessionId, device_id: DeviceId) -> Self {
        Self {
            id,
            session_id,
            device_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Malformed, badly signed, or carrying unusable claims.
    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    /// The validator could not reach what it needs; retrying may work.
    #[error("Auth service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AuthError {
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::ServiceUnavailable(_))
    }

    /// Text safe to show a client; never includes backend detail.
    pub fn public_message(&self) -> &'static str {
        match self {
            AuthError::InvalidToken => "Invalid token",
            AuthError::TokenExpired => "Token expired",
            AuthError::ServiceUnavailable(_) => "Authentication service unavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_service_unavailable_is_transient() {
        assert!(AuthError::service_unavailable("timeout").is_transient());
        assert!(!AuthError::InvalidToken.is_transient());
        assert!(!AuthError::TokenExpired.is_transient());
    }

    #[test]
    fn public_message_hides_backend_detail() {
        let err = AuthError::service_unavailable("redis://10.0.0.3 refused");

        assert_eq!(err.public_message(), "Authentication service unavailable");
        assert!(err.to_string().contains("10.0.0.3"));
    }
}
