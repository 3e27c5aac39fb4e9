//! Rate limit configuration types.
//!
//! One fixed-window policy per ingress scope.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ports::{RateLimitPolicy, RateLimitScope};

/// Limit for a single scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeLimits {
    /// Requests allowed per window.
    pub limit: u32,
    /// Window duration in seconds.
    pub window_secs: u64,
}

impl ScopeLimits {
    pub const fn per_minute(limit: u32) -> Self {
        Self {
            limit,
            window_secs: 60,
        }
    }

    pub fn policy(&self) -> RateLimitPolicy {
        RateLimitPolicy::new(self.limit, Duration::from_secs(self.window_secs))
    }
}

/// Complete rate limit configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_message_send")]
    pub message_send: ScopeLimits,
    #[serde(default = "default_call_initiate")]
    pub call_initiate: ScopeLimits,
    #[serde(default = "default_auth_attempt")]
    pub auth_attempt: ScopeLimits,
    #[serde(default = "default_ws_connect")]
    pub ws_connect: ScopeLimits,
}

fn default_message_send() -> ScopeLimits {
    ScopeLimits::per_minute(60)
}

fn default_call_initiate() -> ScopeLimits {
    ScopeLimits::per_minute(10)
}

fn default_auth_attempt() -> ScopeLimits {
    ScopeLimits::per_minute(5)
}

fn default_ws_connect() -> ScopeLimits {
    ScopeLimits::per_minute(30)
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            message_send: default_message_send(),
            call_initiate: default_call_initiate(),
            auth_attempt: default_auth_attempt(),
            ws_connect: default_ws_connect(),
        }
    }
}

impl RateLimitConfig {
    /// Policy applied to a scope.
    pub fn policy_for(&self, scope: RateLimitScope) -> RateLimitPolicy {
        match scope {
            RateLimitScope::MessageSend => self.message_send.policy(),
            RateLimitScope::CallInitiate => self.call_initiate.policy(),
            RateLimitScope::AuthAttempt => self.auth_attempt.policy(),
            RateLimitScope::WsConnect => self.ws_connect.policy(),
        }
    }

    /// Scopes whose limit or window is zero.
    pub fn invalid_scopes(&self) -> Vec<&'static str> {
        [
            ("message_send", self.message_send),
            ("call_initiate", self.call_initiate),
            ("auth_attempt", self.auth_attempt),
            ("ws_connect", self.ws_connect),
        ]
        .into_iter()
        .filter(|(_, l)| l.limit == 0 || l.window_secs == 0)
        .map(|(name, _)| name)
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_policies() {
        let config = RateLimitConfig::default();
        assert_eq!(config.policy_for(RateLimitScope::MessageSend), RateLimitPolicy::per_minute(60));
        assert_eq!(config.policy_for(RateLimitScope::CallInitiate), RateLimitPolicy::per_minute(10));
        assert_eq!(config.policy_for(RateLimitScope::AuthAttempt), RateLimitPolicy::per_minute(5));
        assert_eq!(config.policy_for(RateLimitScope::WsConnect), RateLimitPolicy::per_minute(30));
        assert!(config.invalid_scopes().is_empty());
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let config: RateLimitConfig =
            serde_json::from_str(r#"{"message_send": {"limit": 10, "window_secs": 30}}"#).unwrap();
        assert_eq!(config.message_send.limit, 10);
        assert_eq!(config.call_initiate, ScopeLimits::per_minute(10));
    }

    #[test]
    fn zero_limit_is_reported() {
        let mut config = RateLimitConfig::default();
        config.ws_connect.limit = 0;
        assert_eq!(config.invalid_scopes(), vec!["ws_connect"]);
    }
}
