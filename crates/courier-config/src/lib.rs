// ============================================================================
// Courier Config - Centralized configuration management
// ============================================================================
//
// This crate provides centralized configuration for all courier services.
// Supports loading from environment variables with sensible defaults.
//
// ============================================================================

mod constants;
mod database;
mod delivery;
mod env;
mod ingress;
mod logging;
mod redis;
mod stream;

// Re-export all public types
pub use constants::{
    MAX_CONTENT_BYTES, MAX_RECIPIENTS, SECONDS_PER_DAY, SECONDS_PER_HOUR, SECONDS_PER_MINUTE,
};
pub use database::DbConfig;
pub use delivery::DeliveryPolicy;
pub use env::EnvSource;
pub use ingress::IngressLimits;
pub use logging::LoggingConfig;
pub use redis::{RedisChannels, RedisKeyPrefixes};
pub use stream::StreamConfig;

use anyhow::Result;
use constants::*;

/// Main configuration structure for courier services
#[derive(Clone, Debug)]
pub struct Config {
    pub redis_url: String,
    /// Only required by processes that touch the message store
    pub database_url: Option<String>,

    pub port: u16,
    pub health_port: u16,
    pub rust_log: String,

    // Sub-configurations
    pub logging: LoggingConfig,
    pub stream: StreamConfig,
    pub delivery: DeliveryPolicy,
    pub ingress: IngressLimits,
    pub db: DbConfig,
    pub redis_key_prefixes: RedisKeyPrefixes,
    pub redis_channels: RedisChannels,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_source(&EnvSource::process())
    }

    pub fn from_source(env: &EnvSource<'_>) -> Result<Self> {
        Ok(Self {
            redis_url: env.required("REDIS_URL")?,
            database_url: env.get("DATABASE_URL"),
            port: env.parse_or("PORT", DEFAULT_PORT),
            health_port: env.parse_or("HEALTH_PORT", DEFAULT_HEALTH_PORT),
            rust_log: env.string("RUST_LOG", "info"),

            logging: LoggingConfig::from_source(env)?,
            stream: StreamConfig::from_source(env)?,
            delivery: DeliveryPolicy::from_source(env),
            ingress: IngressLimits::from_source(env),
            db: DbConfig::from_source(env),
            redis_key_prefixes: RedisKeyPrefixes::from_source(env),
            redis_channels: RedisChannels::from_source(env),
        })
    }

    /// Redis URL with credentials masked, for logging
    pub fn redis_url_safe(&self) -> String {
        mask_credentials(&self.redis_url)
    }
}

/// Replace the userinfo part of a URL with `***`
pub fn mask_credentials(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        let protocol_end = url.find("://").map(|p| p + 3).unwrap_or(0);
        format!("{}***{}", &url[..protocol_end], &url[at_pos..])
    } else {
        url.to_string()
    }
}
