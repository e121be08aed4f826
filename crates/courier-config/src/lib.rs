// ============================================================================
// Courier Config - Centralized configuration management
// ============================================================================
//
// Static settings are loaded once from environment variables (with .env
// support) and sensible defaults. Settings that may change at runtime live in
// `dynamic` and are read through a provider on every access.
//
// ============================================================================

mod captcha;
mod constants;
pub mod dynamic;
mod logging;
mod push;
mod redis;

pub use captcha::CaptchaConfig;
pub use constants::{
    MAX_MESSAGE_SIZE, MAX_MULTI_RECIPIENT_BODY_SIZE, SECONDS_PER_DAY, SECONDS_PER_HOUR,
    SECONDS_PER_MINUTE,
};
pub use dynamic::{
    ChallengeConfiguration, ClientPlatform, DynamicConfigProvider, DynamicConfiguration,
    FileConfigProvider, RateLimiterConfig, RateLimitsConfiguration, StaticConfigProvider,
    UnsealedSenderConfiguration,
};
pub use logging::LoggingConfig;
pub use push::{ApnsConfig, ApnsEnvironment, FcmConfig, PushResilienceConfig};
pub use redis::RedisKeyPrefixes;

use anyhow::Result;
use constants::*;
use std::time::Duration;

/// Where the dynamic configuration comes from
#[derive(Clone, Debug)]
pub struct DynamicConfigSource {
    /// JSON file to poll; `None` keeps the built-in defaults
    pub path: Option<String>,
    pub poll_interval: Duration,
}

/// Main configuration structure for the courier server
#[derive(Clone, Debug)]
pub struct Config {
    /// Postgres account directory; in-memory accounts when unset
    pub database_url: Option<String>,
    /// Shared cache and message queues; in-memory when unset
    pub redis_url: Option<String>,

    pub port: u16,
    pub bind_address: String,
    pub message_ttl_days: i64,

    /// Size of the multi-recipient delivery worker pool
    pub fanout_workers: usize,

    // Sub-configurations
    pub logging: LoggingConfig,
    pub apns: ApnsConfig,
    pub fcm: FcmConfig,
    pub push_resilience: PushResilienceConfig,
    pub captcha: CaptchaConfig,
    pub redis_key_prefixes: RedisKeyPrefixes,
    pub dynamic: DynamicConfigSource,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),

            port,
            bind_address: format!("[::]:{}", port),

            message_ttl_days: std::env::var("MESSAGE_TTL_DAYS")
                .ok()
                .and_then(|d| d.parse().ok())
                .unwrap_or(DEFAULT_MESSAGE_TTL_DAYS),

            fanout_workers: std::env::var("FANOUT_WORKERS")
                .ok()
                .and_then(|n| n.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(DEFAULT_FANOUT_WORKERS),

            logging: LoggingConfig::from_env()?,
            apns: ApnsConfig::from_env()?,
            fcm: FcmConfig::from_env()?,
            push_resilience: PushResilienceConfig::from_env(),
            captcha: CaptchaConfig::from_env(),
            redis_key_prefixes: RedisKeyPrefixes::from_env(),
            dynamic: DynamicConfigSource {
                path: std::env::var("DYNAMIC_CONFIG_PATH").ok().filter(|s| !s.is_empty()),
                poll_interval: Duration::from_secs(
                    std::env::var("DYNAMIC_CONFIG_POLL_SECS")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(DEFAULT_DYNAMIC_CONFIG_POLL_SECS),
                ),
            },
        })
    }

    /// Single-node settings with every external integration disabled
    pub fn local(hash_salt: impl Into<String>) -> Self {
        Self {
            database_url: None,
            redis_url: None,
            port: DEFAULT_PORT,
            bind_address: format!("[::]:{}", DEFAULT_PORT),
            message_ttl_days: DEFAULT_MESSAGE_TTL_DAYS,
            fanout_workers: DEFAULT_FANOUT_WORKERS,
            logging: LoggingConfig {
                hash_salt: hash_salt.into(),
                rust_log: "info".to_string(),
            },
            apns: ApnsConfig::default(),
            fcm: FcmConfig::default(),
            push_resilience: PushResilienceConfig::default(),
            captcha: CaptchaConfig::default(),
            redis_key_prefixes: RedisKeyPrefixes::default(),
            dynamic: DynamicConfigSource {
                path: None,
                poll_interval: Duration::from_secs(DEFAULT_DYNAMIC_CONFIG_POLL_SECS),
            },
        }
    }

    pub fn message_ttl_seconds(&self) -> i64 {
        self.message_ttl_days * SECONDS_PER_DAY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        // SAFETY: tests touching the environment run serially
        unsafe {
            for key in [
                "DATABASE_URL",
                "REDIS_URL",
                "PORT",
                "FANOUT_WORKERS",
                "APNS_ENABLED",
                "FCM_ENABLED",
                "DYNAMIC_CONFIG_PATH",
            ] {
                std::env::remove_var(key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_missing_hash_salt_is_rejected() {
        clear_env();
        unsafe {
            std::env::remove_var("LOG_HASH_SALT");
        }

        assert!(Config::from_env().is_err());
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        unsafe {
            std::env::set_var("LOG_HASH_SALT", "test-salt-that-is-super-secret");
        }

        let config = Config::from_env().unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.bind_address, format!("[::]:{}", DEFAULT_PORT));
        assert_eq!(config.fanout_workers, DEFAULT_FANOUT_WORKERS);
        assert!(config.redis_url.is_none());
        assert!(config.dynamic.path.is_none());
        assert!(!config.apns.enabled);
        assert_eq!(config.message_ttl_seconds(), DEFAULT_MESSAGE_TTL_DAYS * SECONDS_PER_DAY);
    }

    #[test]
    fn test_local_disables_integrations() {
        let config = Config::local("salt");
        assert!(!config.apns.enabled);
        assert!(!config.fcm.enabled);
        assert!(config.database_url.is_none());
        assert_eq!(config.logging.hash_salt, "salt");
    }

    #[test]
    #[serial]
    fn test_apns_requires_key_path() {
        clear_env();
        unsafe {
            std::env::set_var("LOG_HASH_SALT", "test-salt-that-is-super-secret");
            std::env::set_var("APNS_ENABLED", "true");
            std::env::remove_var("APNS_KEY_PATH");
        }

        assert!(Config::from_env().is_err());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_zero_fanout_workers_falls_back() {
        clear_env();
        unsafe {
            std::env::set_var("LOG_HASH_SALT", "test-salt-that-is-super-secret");
            std::env::set_var("FANOUT_WORKERS", "0");
        }

        assert_eq!(Config::from_env().unwrap().fanout_workers, DEFAULT_FANOUT_WORKERS);
        clear_env();
    }
}
