//! HTTP middleware for axum.
//!
//! - `auth` - Bearer authentication middleware and extractor
//! - `rate_limit` - Per-IP and per-user ingress limits with quota headers

pub mod auth;
pub mod rate_limit;

pub use auth::{auth_error_response, auth_middleware, AuthRejection, AuthState, RequireAuth};
pub use rate_limit::{
    apply_rate_limit_headers, auth_attempt_limit, extract_client_ip, message_send_limit, too_many_requests,
    RateLimiterState,
};
