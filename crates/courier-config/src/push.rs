// ============================================================================
// Push Gateway Configuration
// ============================================================================

use std::time::Duration;

/// APNs environment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApnsEnvironment {
    Production,
    Development,
}

impl std::str::FromStr for ApnsEnvironment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "development" | "dev" | "sandbox" => Ok(Self::Development),
            other => anyhow::bail!("Invalid APNS_ENVIRONMENT: {}", other),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ApnsConfig {
    /// Whether APNs is enabled (default: false)
    pub enabled: bool,
    pub environment: ApnsEnvironment,
    /// Path to .p8 authentication key file
    pub key_path: String,
    /// APNs Key ID (10 characters)
    pub key_id: String,
    pub team_id: String,
    /// APNs topic (usually the bundle id)
    pub topic: String,
}

impl ApnsConfig {
    pub(crate) fn from_env() -> anyhow::Result<Self> {
        let enabled = std::env::var("APNS_ENABLED")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false);

        let key_path = std::env::var("APNS_KEY_PATH").unwrap_or_default();
        if enabled && key_path.is_empty() {
            anyhow::bail!("APNS_KEY_PATH is required when APNS_ENABLED=true");
        }

        Ok(Self {
            enabled,
            environment: std::env::var("APNS_ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string())
                .parse()?,
            key_path,
            key_id: std::env::var("APNS_KEY_ID").unwrap_or_default(),
            team_id: std::env::var("APNS_TEAM_ID").unwrap_or_default(),
            topic: std::env::var("APNS_TOPIC").unwrap_or_else(|_| "org.courier.app".to_string()),
        })
    }
}

impl Default for ApnsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            environment: ApnsEnvironment::Development,
            key_path: String::new(),
            key_id: String::new(),
            team_id: String::new(),
            topic: "org.courier.app".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FcmConfig {
    pub enabled: bool,
    /// Legacy HTTP endpoint; canonical registration ids are only reported there
    pub endpoint: String,
    pub server_key: String,
    pub request_timeout: Duration,
}

impl FcmConfig {
    pub(crate) fn from_env() -> anyhow::Result<Self> {
        let enabled = std::env::var("FCM_ENABLED")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false);

        let server_key = std::env::var("FCM_SERVER_KEY").unwrap_or_default();
        if enabled && server_key.is_empty() {
            anyhow::bail!("FCM_SERVER_KEY is required when FCM_ENABLED=true");
        }

        Ok(Self {
            enabled,
            endpoint: std::env::var("FCM_ENDPOINT")
                .unwrap_or_else(|_| "https://fcm.googleapis.com/fcm/send".to_string()),
            server_key,
            request_timeout: Duration::from_millis(
                std::env::var("FCM_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5_000),
            ),
        })
    }
}

impl Default for FcmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "https://fcm.googleapis.com/fcm/send".to_string(),
            server_key: String::new(),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Circuit breaker + retry policy shared by the push gateways
#[derive(Clone, Debug)]
pub struct PushResilienceConfig {
    pub failure_threshold: u32,
    pub request_timeout: Duration,
    pub reset_timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    /// Capacity of the channel feeding the push feedback executor
    pub feedback_queue_size: usize,
}

impl PushResilienceConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            failure_threshold: std::env::var("PUSH_CB_FAILURE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            request_timeout: Duration::from_millis(
                std::env::var("PUSH_REQUEST_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5000),
            ),
            reset_timeout: Duration::from_secs(
                std::env::var("PUSH_CB_RESET_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),
            max_retries: std::env::var("PUSH_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            initial_backoff: Duration::from_millis(
                std::env::var("PUSH_INITIAL_BACKOFF_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(100),
            ),
            feedback_queue_size: std::env::var("PUSH_FEEDBACK_QUEUE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(crate::constants::DEFAULT_PUSH_FEEDBACK_QUEUE),
        }
    }
}

impl Default for PushResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            request_timeout: Duration::from_secs(5),
            reset_timeout: Duration::from_secs(30),
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            feedback_queue_size: crate::constants::DEFAULT_PUSH_FEEDBACK_QUEUE,
        }
    }
}
