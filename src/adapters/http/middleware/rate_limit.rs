//! Rate limiting middleware for axum.
//!
//! Two ingress gates built on the `RateLimiter` port:
//!
//! - [`auth_attempt_limit`] - keyed by client IP, for login endpoints
//! - [`message_send_limit`] - keyed by the authenticated user
//!
//! Rate limit status is returned in standard HTTP headers on every
//! limited response:
//! - `X-RateLimit-Limit`: Maximum requests allowed in the window
//! - `X-RateLimit-Remaining`: Requests remaining in the current window
//! - `X-RateLimit-Reset`: Seconds until the window resets
//! - `Retry-After`: Seconds to wait (only on 429 response)
//!
//! A limiter outage fails open: the request proceeds and a warning is logged.
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, routing::post, middleware};
//!
//! let limiter: Arc<dyn RateLimiter> = Arc::new(InMemoryRateLimiter::with_defaults());
//!
//! let app = Router::new()
//!     .route("/auth/login", post(login))
//!     .layer(middleware::from_fn_with_state(limiter, auth_attempt_limit));
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use crate::domain::foundation::AuthenticatedUser;
use crate::ports::{RateLimitError, RateLimitResult, RateLimiter};

/// Rate limiter middleware state.
pub type RateLimiterState = Arc<dyn RateLimiter>;

/// Standard rate limit header names.
pub mod headers {
    use super::HeaderName;

    pub static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
    pub static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
    /// Seconds until the current window resets.
    pub static X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
}

/// Limits login attempts per client IP.
pub async fn auth_attempt_limit(
    State(limiter): State<RateLimiterState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(ip) = extract_client_ip(request.headers(), connect_info.as_ref()) else {
        tracing::debug!("no client address, skipping auth attempt limit");
        return next.run(request).await;
    };

    let outcome = limiter.allow_auth_attempt(&ip).await;
    gate(outcome, "auth_attempt", request, next).await
}

/// Limits message sends per authenticated user.
///
/// Must run after the auth middleware; unauthenticated requests pass through.
pub async fn message_send_limit(
    State(limiter): State<RateLimiterState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(user) = request.extensions().get::<AuthenticatedUser>().cloned() else {
        return next.run(request).await;
    };

    let outcome = limiter.allow_message_send(&user.id).await;
    gate(outcome, "message_send", request, next).await
}

async fn gate(
    outcome: Result<RateLimitResult, RateLimitError>,
    scope: &'static str,
    request: Request,
    next: Next,
) -> Response {
    match outcome {
        Ok(result) if result.is_denied() => {
            tracing::info!(scope, limit = result.limit, reset_in = result.reset_in_secs(), "rate limit exceeded");
            too_many_requests(&result)
        }
        Ok(result) => {
            let mut response = next.run(request).await;
            apply_rate_limit_headers(response.headers_mut(), &result);
            response
        }
        Err(e) => {
            tracing::warn!(scope, error = %e, "rate limiter unavailable, allowing request");
            next.run(request).await
        }
    }
}

/// Extract client IP, checking forwarded headers first.
///
/// Order of precedence:
/// 1. X-Forwarded-For header (first IP in list)
/// 2. X-Real-IP header
/// 3. ConnectInfo socket address
pub fn extract_client_ip(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>) -> Option<String> {
    if let Some(first) = headers
        .get("X-Forwarded-For")
        .and_then(|h| h.to_str().ok())
        .and_then(|forwarded| forwarded.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return Some(first.to_string());
    }

    if let Some(real_ip) = headers
        .get("X-Real-IP")
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return Some(real_ip.to_string());
    }

    connect_info.map(|ci| ci.0.ip().to_string())
}

/// 429 response with quota headers and a JSON body.
pub fn too_many_requests(result: &RateLimitResult) -> Response {
    let retry_after = result.reset_in_secs();
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(serde_json::json!({
            "error": "Rate limit exceeded",
            "code": "RATE_LIMITED",
            "limit": result.limit,
            "remaining": result.remaining,
            "reset_in": retry_after,
        })),
    )
        .into_response();

    let headers = response.headers_mut();
    apply_rate_limit_headers(headers, result);
    headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

pub fn apply_rate_limit_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    headers.insert(headers::X_RATELIMIT_LIMIT.clone(), HeaderValue::from(result.limit));
    headers.insert(headers::X_RATELIMIT_REMAINING.clone(), HeaderValue::from(result.remaining));
    headers.insert(headers::X_RATELIMIT_RESET.clone(), HeaderValue::from(result.reset_in_secs()));
}
