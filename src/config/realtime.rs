//! Tuning for the outbox relay, event bus, sockets, presence and calls.
//!
//! Durations are plain seconds so they map onto environment variables
//! (`CHAT_REALTIME__WEBSOCKET__PING_INTERVAL_SECS=30`). Each section
//! converts into the runtime config of the component it tunes.

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;
use crate::adapters::events::{EventBusConfig, OutboxProcessorConfig};
use crate::adapters::websocket::{ConnectionConfig, LocalQuotas, OverflowPolicy};
use crate::application::{CallSignalingConfig, PresenceSweeperConfig};
use crate::domain::routing::ALL_TOPICS_PATTERN;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutboxSettings {
    pub poll_interval_secs: u64,
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_backoff_secs: u64,
    pub dead_letter_backoff_secs: u64,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            batch_size: 100,
            max_retries: 5,
            retry_backoff_secs: 60,
            dead_letter_backoff_secs: 3600,
        }
    }
}

impl OutboxSettings {
    pub fn processor_config(&self) -> OutboxProcessorConfig {
        OutboxProcessorConfig::default()
            .with_poll_interval(Duration::from_secs(self.poll_interval_secs))
            .with_batch_size(self.batch_size)
            .with_max_retries(self.max_retries)
            .with_retry_backoff(Duration::from_secs(self.retry_backoff_secs))
            .with_dead_letter_backoff(Duration::from_secs(self.dead_letter_backoff_secs))
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.poll_interval_secs == 0 {
            return Err(ValidationError::MustBePositive("outbox.poll_interval_secs"));
        }
        if self.batch_size == 0 {
            return Err(ValidationError::MustBePositive("outbox.batch_size"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventBusSettings {
    pub pattern: String,
    pub max_concurrent_handlers: usize,
}

impl Default for EventBusSettings {
    fn default() -> Self {
        Self {
            pattern: ALL_TOPICS_PATTERN.to_string(),
            max_concurrent_handlers: 64,
        }
    }
}

impl EventBusSettings {
    pub fn bus_config(&self) -> EventBusConfig {
        EventBusConfig::default()
            .with_pattern(self.pattern.clone())
            .with_max_concurrent_handlers(self.max_concurrent_handlers)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSocketSettings {
    pub outbound_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    pub ping_interval_secs: u64,
    pub pong_wait_secs: u64,
    pub write_wait_secs: u64,
    pub max_message_bytes: usize,
    pub max_batch: usize,
    pub local_quotas: LocalQuotas,
    pub local_window_secs: u64,
    pub presence_refresh_secs: u64,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        let defaults = ConnectionConfig::default();
        Self {
            outbound_capacity: defaults.outbound_capacity,
            overflow_policy: defaults.overflow_policy,
            ping_interval_secs: defaults.ping_interval.as_secs(),
            pong_wait_secs: defaults.pong_wait.as_secs(),
            write_wait_secs: defaults.write_wait.as_secs(),
            max_message_bytes: defaults.max_message_bytes,
            max_batch: defaults.max_batch,
            local_quotas: defaults.local_quotas,
            local_window_secs: defaults.local_window.as_secs(),
            presence_refresh_secs: defaults.presence_refresh.as_secs(),
        }
    }
}

impl WebSocketSettings {
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            outbound_capacity: self.outbound_capacity,
            overflow_policy: self.overflow_policy,
            ping_interval: Duration::from_secs(self.ping_interval_secs),
            pong_wait: Duration::from_secs(self.pong_wait_secs),
            write_wait: Duration::from_secs(self.write_wait_secs),
            max_message_bytes: self.max_message_bytes,
            max_batch: self.max_batch,
            local_quotas: self.local_quotas,
            local_window: Duration::from_secs(self.local_window_secs),
            presence_refresh: Duration::from_secs(self.presence_refresh_secs),
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.outbound_capacity == 0 {
            return Err(ValidationError::MustBePositive("websocket.outbound_capacity"));
        }
        if self.ping_interval_secs == 0 {
            return Err(ValidationError::MustBePositive("websocket.ping_interval_secs"));
        }
        if self.pong_wait_secs <= self.ping_interval_secs {
            return Err(ValidationError::PongWaitTooShort);
        }
        if self.presence_refresh_secs == 0 {
            return Err(ValidationError::MustBePositive("websocket.presence_refresh_secs"));
        }
        if self.max_message_bytes == 0 {
            return Err(ValidationError::MustBePositive("websocket.max_message_bytes"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PresenceSettings {
    /// Lifetime of a user's status record after the last write.
    pub status_ttl_secs: u64,
    pub stale_max_age_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            status_ttl_secs: 300,
            stale_max_age_secs: 90,
            sweep_interval_secs: 30,
        }
    }
}

impl PresenceSettings {
    pub fn status_ttl(&self) -> Duration {
        Duration::from_secs(self.status_ttl_secs)
    }

    pub fn sweeper_config(&self) -> PresenceSweeperConfig {
        PresenceSweeperConfig {
            interval: Duration::from_secs(self.sweep_interval_secs),
            max_age: Duration::from_secs(self.stale_max_age_secs),
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.sweep_interval_secs == 0 {
            return Err(ValidationError::MustBePositive("presence.sweep_interval_secs"));
        }
        if self.stale_max_age_secs <= self.sweep_interval_secs {
            return Err(ValidationError::PresenceMaxAgeTooShort);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CallSettings {
    pub state_ttl_secs: u64,
    pub ice_cap: usize,
    pub ice_ttl_secs: u64,
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            state_ttl_secs: 3600,
            ice_cap: 50,
            ice_ttl_secs: 300,
        }
    }
}

impl CallSettings {
    pub fn signaling_config(&self) -> CallSignalingConfig {
        CallSignalingConfig {
            state_ttl: Duration::from_secs(self.state_ttl_secs),
            ice_cap: self.ice_cap,
            ice_ttl: Duration::from_secs(self.ice_ttl_secs),
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.ice_cap == 0 {
            return Err(ValidationError::MustBePositive("calls.ice_cap"));
        }
        Ok(())
    }
}

/// Checks every realtime section.
pub(super) fn validate_all(
    outbox: &OutboxSettings,
    websocket: &WebSocketSettings,
    presence: &PresenceSettings,
    calls: &CallSettings,
) -> Result<(), ValidationError> {
    outbox.validate()?;
    websocket.validate()?;
    presence.validate()?;
    if websocket.presence_refresh_secs >= presence.stale_max_age_secs {
        return Err(ValidationError::PresenceRefreshTooSlow);
    }
    calls.validate()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_defaults_match_connection_defaults() {
        assert_eq!(
            WebSocketSettings::default().connection_config(),
            ConnectionConfig::default()
        );
    }

    #[test]
    fn pong_wait_must_exceed_ping_interval() {
        let settings = WebSocketSettings {
            ping_interval_secs: 60,
            pong_wait_secs: 60,
            ..Default::default()
        };
        assert_eq!(settings.validate(), Err(ValidationError::PongWaitTooShort));
    }

    #[test]
    fn presence_max_age_must_exceed_sweep_interval() {
        let settings = PresenceSettings {
            stale_max_age_secs: 30,
            sweep_interval_secs: 30,
            ..Default::default()
        };
        assert_eq!(settings.validate(), Err(ValidationError::PresenceMaxAgeTooShort));
    }

    #[test]
    fn presence_refresh_must_beat_the_sweep() {
        let websocket = WebSocketSettings {
            presence_refresh_secs: 90,
            ..Default::default()
        };
        let result = validate_all(
            &OutboxSettings::default(),
            &websocket,
            &PresenceSettings::default(),
            &CallSettings::default(),
        );
        assert_eq!(result, Err(ValidationError::PresenceRefreshTooSlow));
    }

    #[test]
    fn outbox_settings_convert_to_processor_config() {
        let config = OutboxSettings {
            poll_interval_secs: 1,
            batch_size: 10,
            ..Default::default()
        }
        .processor_config();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn call_settings_convert_to_signaling_config() {
        let config = CallSettings::default().signaling_config();
        assert_eq!(config.state_ttl, Duration::from_secs(3600));
        assert_eq!(config.ice_cap, 50);
        assert_eq!(config.ice_ttl, Duration::from_secs(300));
    }
}
