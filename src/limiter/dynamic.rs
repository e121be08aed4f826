use arc_swap::ArcSwap;
use async_trait::async_trait;
use courier_config::RateLimiterConfig;
use std::sync::Arc;

use super::{
    LimiterDeps, LockingRateLimiter, RateLimitError, RateLimiter, RateLimiterName,
    TokenBucketLimiter,
};

type Built = Box<dyn RateLimiter>;

/// A named limiter that follows the live dynamic configuration.
///
/// The built instance sits in a single `ArcSwap` slot. Every access compares
/// the live parameters with the instance's; on mismatch a replacement is
/// built and installed with compare-and-swap. Losing the race just means
/// another caller installed an equivalent instance first.
pub struct DynamicRateLimiter {
    name: RateLimiterName,
    deps: LimiterDeps,
    current: ArcSwap<Built>,
}

impl DynamicRateLimiter {
    pub fn new(name: RateLimiterName, deps: LimiterDeps) -> Self {
        let config = name.config(&deps.config.configuration());
        let current = ArcSwap::from_pointee(build(name, config, &deps));
        Self {
            name,
            deps,
            current,
        }
    }

    pub fn name(&self) -> RateLimiterName {
        self.name
    }

    /// The instance matching the live configuration
    fn limiter(&self) -> Arc<Built> {
        let live = self.name.config(&self.deps.config.configuration());
        let current = self.current.load_full();
        if current.config() == live {
            return current;
        }

        let fresh = Arc::new(build(self.name, live, &self.deps));
        let previous = self.current.compare_and_swap(&current, Arc::clone(&fresh));
        if Arc::ptr_eq(&*previous, &current) {
            self.deps
                .metrics
                .limiter_rebuilds
                .with_label_values(&[self.name.as_str()])
                .inc();
            tracing::info!(
                limiter = %self.name,
                bucket_size = live.bucket_size,
                leak_rate_per_minute = live.leak_rate_per_minute,
                "Rate limiter reconfigured"
            );
            fresh
        } else {
            self.current.load_full()
        }
    }
}

fn build(name: RateLimiterName, config: RateLimiterConfig, deps: &LimiterDeps) -> Built {
    let bucket = TokenBucketLimiter::new(
        name,
        config,
        deps.cache.clone(),
        deps.clock.clone(),
        deps.key_prefixes.leaky_bucket.clone(),
    );
    if name.is_locking() {
        Box::new(LockingRateLimiter::new(
            bucket,
            deps.key_prefixes.leaky_lock.clone(),
        ))
    } else {
        Box::new(bucket)
    }
}

#[async_trait]
impl RateLimiter for DynamicRateLimiter {
    fn config(&self) -> RateLimiterConfig {
        self.limiter().config()
    }

    async fn validate_with_cost(&self, key: &str, cost: u32) -> Result<(), RateLimitError> {
        self.limiter().validate_with_cost(key, cost).await
    }

    async fn has_available_permits(&self, key: &str, permits: u32) -> Result<bool, RateLimitError> {
        self.limiter().has_available_permits(key, permits).await
    }

    async fn clear(&self, key: &str) -> Result<(), RateLimitError> {
        self.limiter().clear(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SharedCache;
    use crate::limiter::test_support::harness;
    use courier_config::DynamicConfiguration;

    fn with_messages(bucket_size: u32) -> DynamicConfiguration {
        let mut configuration = DynamicConfiguration::default();
        configuration.limits.messages = RateLimiterConfig::new(bucket_size, 1.0);
        configuration
    }

    #[tokio::test]
    async fn test_follows_live_configuration() {
        let h = harness(with_messages(1));
        let limiter = DynamicRateLimiter::new(RateLimiterName::Messages, h.deps.clone());

        limiter.validate("alice").await.unwrap();
        assert!(limiter.validate("alice").await.is_err());

        h.config.update(with_messages(3));
        assert_eq!(limiter.config(), RateLimiterConfig::new(3, 1.0));

        // Bucket state lives in the cache and survives the rebuild
        assert!(limiter.validate("alice").await.is_err());
        h.clock.advance(std::time::Duration::from_secs(60));
        limiter.validate("alice").await.unwrap();
        assert_eq!(
            h.metrics
                .limiter_rebuilds
                .with_label_values(&["messages"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_unchanged_configuration_reuses_instance() {
        let h = harness(with_messages(5));
        let limiter = DynamicRateLimiter::new(RateLimiterName::Messages, h.deps.clone());

        let first = limiter.limiter();
        let second = limiter.limiter();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_concurrent_rebuilds_settle_on_one_instance() {
        let h = harness(with_messages(5));
        let limiter = Arc::new(DynamicRateLimiter::new(RateLimiterName::Messages, h.deps.clone()));
        h.config.update(with_messages(9));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.config() })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap(), RateLimiterConfig::new(9, 1.0));
        }
        assert!(Arc::ptr_eq(&limiter.limiter(), &limiter.limiter()));
    }

    #[tokio::test]
    async fn test_challenge_limiters_are_locking() {
        let h = harness(DynamicConfiguration::default());
        let limiter = DynamicRateLimiter::new(RateLimiterName::PushChallengeAttempt, h.deps.clone());
        h.cache
            .acquire_lease(
                "leaky_lock::pushChallengeAttempt::alice",
                "someone-else",
                std::time::Duration::from_secs(5),
            )
            .await
            .unwrap();

        assert!(limiter.validate("alice").await.is_err());
        limiter.validate("bob").await.unwrap();
    }
}
