use async_trait::async_trait;
use courier_config::RateLimiterConfig;
use std::time::Duration;
use uuid::Uuid;

use super::{RateLimitError, RateLimiter, TokenBucketLimiter};

const LEASE_TTL: Duration = Duration::from_secs(10);

/// Token bucket whose read-modify-write runs under a per-key lease.
///
/// A caller that cannot take the lease is rejected as rate limited rather
/// than waiting for it.
pub struct LockingRateLimiter {
    inner: TokenBucketLimiter,
    lock_prefix: String,
}

impl LockingRateLimiter {
    pub fn new(inner: TokenBucketLimiter, lock_prefix: impl Into<String>) -> Self {
        Self {
            inner,
            lock_prefix: lock_prefix.into(),
        }
    }

    fn lock_key(&self, key: &str) -> String {
        format!("{}{}::{}", self.lock_prefix, self.inner.name(), key)
    }

    async fn release(&self, lock_key: &str, holder: &str) {
        if let Err(e) = self.inner.cache().release_lease(lock_key, holder).await {
            tracing::warn!(
                limiter = %self.inner.name(),
                error = %e,
                "Failed to release limiter lease, it will expire on its own"
            );
        }
    }
}

#[async_trait]
impl RateLimiter for LockingRateLimiter {
    fn config(&self) -> RateLimiterConfig {
        self.inner.config()
    }

    async fn validate_with_cost(&self, key: &str, cost: u32) -> Result<(), RateLimitError> {
        let lock_key = self.lock_key(key);
        let holder = Uuid::new_v4().to_string();

        if !self
            .inner
            .cache()
            .acquire_lease(&lock_key, &holder, LEASE_TTL)
            .await?
        {
            return Err(RateLimitError::Exceeded {
                limiter: self.inner.name().as_str(),
                retry_after: None,
            });
        }

        let result = self.inner.validate_with_cost(key, cost).await;
        self.release(&lock_key, &holder).await;
        result
    }

    async fn has_available_permits(&self, key: &str, permits: u32) -> Result<bool, RateLimitError> {
        self.inner.has_available_permits(key, permits).await
    }

    async fn clear(&self, key: &str) -> Result<(), RateLimitError> {
        self.inner.clear(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{InMemoryCache, SharedCache};
    use crate::clock::ManualClock;
    use crate::limiter::RateLimiterName;
    use std::sync::Arc;

    fn limiter() -> (Arc<InMemoryCache>, LockingRateLimiter) {
        let clock = Arc::new(ManualClock::new(0));
        let cache = Arc::new(InMemoryCache::with_clock(clock.clone()));
        let inner = TokenBucketLimiter::new(
            RateLimiterName::PushChallengeAttempt,
            RateLimiterConfig::new(2, 1.0),
            cache.clone(),
            clock,
            "leaky_bucket::",
        );
        (cache, LockingRateLimiter::new(inner, "leaky_lock::"))
    }

    #[tokio::test]
    async fn test_runs_bucket_and_releases_lease() {
        let (cache, limiter) = limiter();
        limiter.validate("alice").await.unwrap();
        limiter.validate("alice").await.unwrap();
        assert!(limiter.validate("alice").await.is_err());

        assert_eq!(
            cache.get("leaky_lock::pushChallengeAttempt::alice").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_held_lease_rejects() {
        let (cache, limiter) = limiter();
        cache
            .acquire_lease("leaky_lock::pushChallengeAttempt::alice", "other", LEASE_TTL)
            .await
            .unwrap();

        let err = limiter.validate("alice").await.unwrap_err();
        assert!(matches!(err, RateLimitError::Exceeded { retry_after: None, .. }));
        // Nothing was spent
        assert!(limiter.has_available_permits("alice", 2).await.unwrap());
    }
}
