//! Identity resolution for connection and request tokens.

use async_trait::async_trait;

use crate::domain::foundation::{AuthError, AuthenticatedUser};

/// Turns a bearer token into the user, session and device it was issued for.
///
/// Expired tokens map to `TokenExpired`, anything else unusable to
/// `InvalidToken`. `ServiceUnavailable` is reserved for failures where the
/// same token might validate on retry; callers answer those with 503.
#[async_trait]
pub trait SessionValidator: Send + Sync {
    /// `token` is the raw value, without any `Bearer ` prefix.
    async fn validate(&self, token: &str) -> Result<AuthenticatedUser, AuthError>;
}
