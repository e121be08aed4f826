// ============================================================================
// Rate Limiter Engine
// ============================================================================
//
// Token-bucket and cardinality limiters over the shared cache.
//
// - bucket.rs: token-bucket algorithm (`TokenBucketLimiter`)
// - locking.rs: bucket guarded by a per-key lease (`LockingRateLimiter`)
// - dynamic.rs: hot-reconfigurable holder (`DynamicRateLimiter`)
// - cardinality.rs: distinct-destination limiter
// - unsealed.rs / prekeys.rs: limiters reset by a solved challenge
//
// Limiter parameters are read from the dynamic configuration on every call.
//
// ============================================================================

mod bucket;
mod cardinality;
mod dynamic;
mod locking;
mod prekeys;
mod unsealed;

pub use bucket::TokenBucketLimiter;
pub use cardinality::CardinalityRateLimiter;
pub use dynamic::DynamicRateLimiter;
pub use locking::LockingRateLimiter;
pub use prekeys::PreKeyRateLimiter;
pub use unsealed::UnsealedSenderRateLimiter;

use async_trait::async_trait;
use courier_config::{
    DynamicConfigProvider, DynamicConfiguration, RateLimiterConfig, RedisKeyPrefixes,
};
use courier_error::AppError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::cache::SharedCache;
use crate::clock::Clock;
use crate::metrics::Metrics;

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("{limiter} limit exceeded")]
    Exceeded {
        limiter: &'static str,
        retry_after: Option<Duration>,
    },

    #[error("rate limiter storage failure: {0}")]
    Storage(#[from] anyhow::Error),
}

impl RateLimitError {
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RateLimitError::Exceeded { retry_after, .. } => *retry_after,
            RateLimitError::Storage(_) => None,
        }
    }
}

impl From<RateLimitError> for AppError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::Exceeded { retry_after, .. } => {
                AppError::RateLimitExceeded { retry_after }
            }
            RateLimitError::Storage(e) => AppError::Unknown(e),
        }
    }
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Parameters this instance was built with
    fn config(&self) -> RateLimiterConfig;

    async fn validate_with_cost(&self, key: &str, cost: u32) -> Result<(), RateLimitError>;

    async fn validate(&self, key: &str) -> Result<(), RateLimitError> {
        self.validate_with_cost(key, 1).await
    }

    /// Same arithmetic as `validate`, without spending anything
    async fn has_available_permits(&self, key: &str, permits: u32) -> Result<bool, RateLimitError>;

    async fn clear(&self, key: &str) -> Result<(), RateLimitError>;
}

/// Token-bucket limiters known to the dynamic configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimiterName {
    /// Primary punitive limiter, keyed by sender identity
    Messages,
    /// Unidentified sends, keyed by client host
    SealedSenderIp,
    PreKeys,
    RateLimitReset,
    PushChallengeAttempt,
    PushChallengeSuccess,
    CaptchaChallengeAttempt,
    CaptchaChallengeSuccess,
}

impl RateLimiterName {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimiterName::Messages => "messages",
            RateLimiterName::SealedSenderIp => "sealedSenderIp",
            RateLimiterName::PreKeys => "preKeys",
            RateLimiterName::RateLimitReset => "rateLimitReset",
            RateLimiterName::PushChallengeAttempt => "pushChallengeAttempt",
            RateLimiterName::PushChallengeSuccess => "pushChallengeSuccess",
            RateLimiterName::CaptchaChallengeAttempt => "captchaChallengeAttempt",
            RateLimiterName::CaptchaChallengeSuccess => "captchaChallengeSuccess",
        }
    }

    pub fn config(&self, configuration: &DynamicConfiguration) -> RateLimiterConfig {
        let limits = &configuration.limits;
        match self {
            RateLimiterName::Messages => limits.messages,
            RateLimiterName::SealedSenderIp => limits.sealed_sender_ip,
            RateLimiterName::PreKeys => limits.pre_keys,
            RateLimiterName::RateLimitReset => limits.rate_limit_reset,
            RateLimiterName::PushChallengeAttempt => limits.push_challenge_attempt,
            RateLimiterName::PushChallengeSuccess => limits.push_challenge_success,
            RateLimiterName::CaptchaChallengeAttempt => limits.captcha_challenge_attempt,
            RateLimiterName::CaptchaChallengeSuccess => limits.captcha_challenge_success,
        }
    }

    /// Challenge bookkeeping must not double-spend under concurrent answers
    pub fn is_locking(&self) -> bool {
        matches!(
            self,
            RateLimiterName::RateLimitReset
                | RateLimiterName::PushChallengeAttempt
                | RateLimiterName::PushChallengeSuccess
                | RateLimiterName::CaptchaChallengeAttempt
                | RateLimiterName::CaptchaChallengeSuccess
        )
    }
}

impl fmt::Display for RateLimiterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a limiter needs from the composition root
#[derive(Clone)]
pub struct LimiterDeps {
    pub cache: Arc<dyn SharedCache>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<dyn DynamicConfigProvider>,
    pub metrics: Arc<Metrics>,
    pub key_prefixes: RedisKeyPrefixes,
}

/// Every named token-bucket limiter, one hot-reconfigurable instance each
pub struct RateLimiters {
    pub messages: Arc<DynamicRateLimiter>,
    pub sealed_sender_ip: Arc<DynamicRateLimiter>,
    pub pre_keys: Arc<DynamicRateLimiter>,
    pub rate_limit_reset: Arc<DynamicRateLimiter>,
    pub push_challenge_attempt: Arc<DynamicRateLimiter>,
    pub push_challenge_success: Arc<DynamicRateLimiter>,
    pub captcha_challenge_attempt: Arc<DynamicRateLimiter>,
    pub captcha_challenge_success: Arc<DynamicRateLimiter>,
}

impl RateLimiters {
    pub fn new(deps: &LimiterDeps) -> Self {
        let build = |name| Arc::new(DynamicRateLimiter::new(name, deps.clone()));
        Self {
            messages: build(RateLimiterName::Messages),
            sealed_sender_ip: build(RateLimiterName::SealedSenderIp),
            pre_keys: build(RateLimiterName::PreKeys),
            rate_limit_reset: build(RateLimiterName::RateLimitReset),
            push_challenge_attempt: build(RateLimiterName::PushChallengeAttempt),
            push_challenge_success: build(RateLimiterName::PushChallengeSuccess),
            captcha_challenge_attempt: build(RateLimiterName::CaptchaChallengeAttempt),
            captcha_challenge_success: build(RateLimiterName::CaptchaChallengeSuccess),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::clock::ManualClock;
    use courier_config::StaticConfigProvider;

    pub struct Harness {
        pub clock: Arc<ManualClock>,
        pub cache: Arc<InMemoryCache>,
        pub config: Arc<StaticConfigProvider>,
        pub metrics: Arc<Metrics>,
        pub deps: LimiterDeps,
    }

    pub fn harness(configuration: DynamicConfiguration) -> Harness {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let cache = Arc::new(InMemoryCache::with_clock(clock.clone()));
        let config = Arc::new(StaticConfigProvider::new(configuration));
        let metrics = Arc::new(Metrics::new().unwrap());
        let deps = LimiterDeps {
            cache: cache.clone(),
            clock: clock.clone(),
            config: config.clone(),
            metrics: metrics.clone(),
            key_prefixes: RedisKeyPrefixes::default(),
        };
        Harness {
            clock,
            cache,
            config,
            metrics,
            deps,
        }
    }
}
