//! Application configuration module
//!
//! Type-safe configuration loaded from environment variables using the
//! `config` and `dotenvy` crates. Variables carry the `CHAT_REALTIME`
//! prefix and nested values are separated by a double underscore.
//!
//! # Example
//!
//! ```no_run
//! use chat_realtime::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//! ```

mod auth;
mod database;
mod error;
mod realtime;
mod redis;
mod server;

pub use auth::AuthConfig;
pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use realtime::{CallSettings, EventBusSettings, OutboxSettings, PresenceSettings, WebSocketSettings};
pub use redis::RedisConfig;
pub use server::{Environment, ServerConfig};

use serde::Deserialize;
use std::path::Path;

use crate::adapters::rate_limiter::RateLimitConfig;

const ENV_PREFIX: &str = "CHAT_REALTIME";

/// Root application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// PostgreSQL holding the outbox tables
    pub database: DatabaseConfig,

    pub redis: RedisConfig,

    pub auth: AuthConfig,

    #[serde(default)]
    pub outbox: OutboxSettings,

    #[serde(default)]
    pub event_bus: EventBusSettings,

    #[serde(default)]
    pub websocket: WebSocketSettings,

    #[serde(default)]
    pub presence: PresenceSettings,

    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    #[serde(default)]
    pub calls: CallSettings,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// 1. Loads `.env` if present (development)
    /// 2. Reads variables with the `CHAT_REALTIME` prefix
    /// 3. Uses `__` to separate nested values
    ///
    /// - `CHAT_REALTIME__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `CHAT_REALTIME__RATE_LIMITS__MESSAGE_SEND__LIMIT=120`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or values
    /// cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_environment()
    }

    /// Like [`AppConfig::load`], reading a specific env file first.
    pub fn load_with_env_file(path: &Path) -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::from_path(path) {
            tracing::warn!(path = %path.display(), error = %e, "env file not loaded");
        }
        Self::from_environment()
    }

    fn from_environment() -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Semantic validation of every section.
    ///
    /// # Errors
    ///
    /// Returns the first `ValidationError` found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.database.validate()?;
        self.redis.validate()?;
        self.auth.validate(&self.server.environment)?;
        realtime::validate_all(&self.outbox, &self.websocket, &self.presence, &self.calls)?;
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}
