// ============================================================================
// Dynamic Configuration
// ============================================================================
//
// Settings operators may change while the server runs: limiter parameters,
// enforcement rollout toggles, unsealed-sender allowances and the minimum
// client versions that understand challenge responses.
//
// Consumers never cache a snapshot: every check calls
// `DynamicConfigProvider::configuration()` and reads what it needs.
//
// ============================================================================

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

/// Token-bucket parameters for one named limiter
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterConfig {
    pub bucket_size: u32,
    pub leak_rate_per_minute: f64,
}

impl RateLimiterConfig {
    pub const fn new(bucket_size: u32, leak_rate_per_minute: f64) -> Self {
        Self {
            bucket_size,
            leak_rate_per_minute,
        }
    }

    pub fn leak_rate_per_millis(&self) -> f64 {
        self.leak_rate_per_minute / 60_000.0
    }

    /// Time needed to refill an empty bucket
    pub fn full_refill(&self) -> Duration {
        if self.leak_rate_per_minute <= 0.0 {
            return Duration::MAX;
        }
        Duration::from_secs_f64(self.bucket_size as f64 / self.leak_rate_per_minute * 60.0)
    }
}

const fn per_day(bucket_size: u32) -> RateLimiterConfig {
    RateLimiterConfig::new(bucket_size, bucket_size as f64 / 1440.0)
}

/// Parameters of every named limiter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitsConfiguration {
    pub messages: RateLimiterConfig,
    pub sealed_sender_ip: RateLimiterConfig,
    pub pre_keys: RateLimiterConfig,
    pub rate_limit_reset: RateLimiterConfig,
    pub push_challenge_attempt: RateLimiterConfig,
    pub push_challenge_success: RateLimiterConfig,
    pub captcha_challenge_attempt: RateLimiterConfig,
    pub captcha_challenge_success: RateLimiterConfig,
}

impl Default for RateLimitsConfiguration {
    fn default() -> Self {
        Self {
            messages: RateLimiterConfig::new(60, 60.0),
            sealed_sender_ip: RateLimiterConfig::new(120, 120.0),
            pre_keys: per_day(6000),
            rate_limit_reset: per_day(2),
            push_challenge_attempt: per_day(10),
            push_challenge_success: per_day(2),
            captcha_challenge_attempt: per_day(10),
            captcha_challenge_success: per_day(2),
        }
    }
}

/// Distinct-destination allowance for identified ("unsealed") senders
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UnsealedSenderConfiguration {
    /// Distinct destinations allowed inside one window
    pub default_cardinality: u32,
    /// Extra destinations granted by a successful challenge
    pub permit_increment: u32,
    /// Lifetime of a granted bonus
    pub bonus_ttl_secs: u64,
    /// Lifetime of the tracked destination set
    pub window_secs: u64,
}

impl Default for UnsealedSenderConfiguration {
    fn default() -> Self {
        Self {
            default_cardinality: 100,
            permit_increment: 50,
            bonus_ttl_secs: 86_400,
            window_secs: 86_400,
        }
    }
}

/// Platform a client reports in its User-Agent
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientPlatform {
    Android,
    Ios,
    Desktop,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChallengeConfiguration {
    /// Rollout toggle: reject pre-key fetches over the limit
    pub pre_key_limit_enforced: bool,
    /// Rollout toggle: reject identified sends over the cardinality ceiling
    pub unsealed_sender_limit_enforced: bool,
    /// Lowest client version (per platform) able to answer a challenge
    pub client_supported_versions: HashMap<ClientPlatform, String>,
}

impl Default for ChallengeConfiguration {
    fn default() -> Self {
        Self {
            pre_key_limit_enforced: false,
            unsealed_sender_limit_enforced: false,
            client_supported_versions: HashMap::new(),
        }
    }
}

/// Everything that may change without a restart
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DynamicConfiguration {
    pub limits: RateLimitsConfiguration,
    pub unsealed_sender: UnsealedSenderConfiguration,
    pub challenge: ChallengeConfiguration,
}

impl DynamicConfiguration {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Failed to parse dynamic configuration")
    }
}

/// Source of the live dynamic configuration, polled on every access
pub trait DynamicConfigProvider: Send + Sync {
    fn configuration(&self) -> Arc<DynamicConfiguration>;
}

/// Provider whose value only changes through `update` (startup defaults, tests)
pub struct StaticConfigProvider {
    current: ArcSwap<DynamicConfiguration>,
}

impl StaticConfigProvider {
    pub fn new(configuration: DynamicConfiguration) -> Self {
        Self {
            current: ArcSwap::from_pointee(configuration),
        }
    }

    pub fn update(&self, configuration: DynamicConfiguration) {
        self.current.store(Arc::new(configuration));
    }
}

impl Default for StaticConfigProvider {
    fn default() -> Self {
        Self::new(DynamicConfiguration::default())
    }
}

impl DynamicConfigProvider for StaticConfigProvider {
    fn configuration(&self) -> Arc<DynamicConfiguration> {
        self.current.load_full()
    }
}

/// Provider backed by a JSON file that is re-read on a fixed interval.
///
/// A file that fails to parse is logged and ignored; the last good
/// configuration stays in effect.
pub struct FileConfigProvider {
    path: PathBuf,
    current: ArcSwap<DynamicConfiguration>,
}

impl FileConfigProvider {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read dynamic configuration {}", path.display()))?;
        let configuration = DynamicConfiguration::from_json(&raw)?;

        Ok(Self {
            path,
            current: ArcSwap::from_pointee(configuration),
        })
    }

    /// Re-read the file once; returns whether the configuration changed
    pub async fn refresh(&self) -> Result<bool> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let fresh = DynamicConfiguration::from_json(&raw)?;

        if *self.current.load_full() == fresh {
            return Ok(false);
        }
        self.current.store(Arc::new(fresh));
        Ok(true)
    }

    /// Spawn the background poller
    pub fn spawn_refresh(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let provider = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match provider.refresh().await {
                    Ok(true) => tracing::info!(
                        path = %provider.path.display(),
                        "Dynamic configuration reloaded"
                    ),
                    Ok(false) => {}
                    Err(e) => tracing::warn!(
                        error = %e,
                        path = %provider.path.display(),
                        "Dynamic configuration reload failed, keeping previous values"
                    ),
                }
            }
        })
    }
}

impl DynamicConfigProvider for FileConfigProvider {
    fn configuration(&self) -> Arc<DynamicConfiguration> {
        self.current.load_full()
    }
}
