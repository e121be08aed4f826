use async_trait::async_trait;
use courier_config::RateLimiterConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::{RateLimitError, RateLimiter, RateLimiterName};
use crate::cache::SharedCache;
use crate::clock::Clock;

// Absorbs float error from `elapsed * rate` so a full refill yields a full bucket
const TOKEN_EPSILON: f64 = 1e-9;

/// Persisted per-key bucket state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketState {
    space_remaining: f64,
    last_update_time_millis: i64,
}

impl BucketState {
    fn full(config: &RateLimiterConfig, now: i64) -> Self {
        Self {
            space_remaining: config.bucket_size as f64,
            last_update_time_millis: now,
        }
    }

    /// Leak tokens back in for the time elapsed since the last touch
    fn replenished(self, config: &RateLimiterConfig, now: i64) -> Self {
        let elapsed = (now - self.last_update_time_millis).max(0) as f64;
        let refilled = self.space_remaining + elapsed * config.leak_rate_per_millis();
        Self {
            space_remaining: refilled.clamp(0.0, config.bucket_size as f64),
            last_update_time_millis: now,
        }
    }
}

/// Token bucket ("leaky bucket") limiter keyed by an arbitrary string
pub struct TokenBucketLimiter {
    name: RateLimiterName,
    config: RateLimiterConfig,
    cache: Arc<dyn SharedCache>,
    clock: Arc<dyn Clock>,
    key_prefix: String,
}

impl TokenBucketLimiter {
    pub fn new(
        name: RateLimiterName,
        config: RateLimiterConfig,
        cache: Arc<dyn SharedCache>,
        clock: Arc<dyn Clock>,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            name,
            config,
            cache,
            clock,
            key_prefix: key_prefix.into(),
        }
    }

    pub fn name(&self) -> RateLimiterName {
        self.name
    }

    pub(crate) fn cache(&self) -> &Arc<dyn SharedCache> {
        &self.cache
    }

    fn bucket_key(&self, key: &str) -> String {
        format!("{}{}::{}", self.key_prefix, self.name, key)
    }

    /// Current state with the elapsed-time refill applied
    async fn load(&self, key: &str) -> Result<BucketState, RateLimitError> {
        let now = self.clock.now_millis();
        let state = match self.cache.get(&self.bucket_key(key)).await? {
            Some(raw) => match serde_json::from_str::<BucketState>(&raw) {
                Ok(state) => state.replenished(&self.config, now),
                Err(e) => {
                    tracing::warn!(
                        limiter = %self.name,
                        error = %e,
                        "Discarding unreadable bucket state"
                    );
                    BucketState::full(&self.config, now)
                }
            },
            None => BucketState::full(&self.config, now),
        };
        Ok(state)
    }

    /// Time for `deficit` tokens to leak back in
    fn retry_after(&self, deficit: f64) -> Option<Duration> {
        let per_minute = self.config.leak_rate_per_minute;
        if per_minute <= 0.0 {
            return None;
        }
        Some(Duration::from_millis((deficit * 60_000.0 / per_minute).ceil() as u64))
    }

    /// Expire the state once the bucket would be full again anyway
    fn state_ttl(&self, state: &BucketState) -> Duration {
        let rate = self.config.leak_rate_per_millis();
        if rate <= 0.0 {
            return Duration::from_secs(courier_config::SECONDS_PER_DAY as u64);
        }
        let missing = self.config.bucket_size as f64 - state.space_remaining;
        Duration::from_millis((missing / rate).ceil() as u64).max(Duration::from_secs(1))
    }
}

#[async_trait]
impl RateLimiter for TokenBucketLimiter {
    fn config(&self) -> RateLimiterConfig {
        self.config
    }

    async fn validate_with_cost(&self, key: &str, cost: u32) -> Result<(), RateLimitError> {
        let mut state = self.load(key).await?;
        let cost = cost as f64;

        if state.space_remaining + TOKEN_EPSILON < cost {
            return Err(RateLimitError::Exceeded {
                limiter: self.name.as_str(),
                retry_after: self.retry_after(cost - state.space_remaining),
            });
        }

        state.space_remaining = (state.space_remaining - cost).max(0.0);
        let raw = serde_json::to_string(&state).map_err(anyhow::Error::from)?;
        self.cache
            .set_ex(&self.bucket_key(key), &raw, self.state_ttl(&state))
            .await?;
        Ok(())
    }

    async fn has_available_permits(&self, key: &str, permits: u32) -> Result<bool, RateLimitError> {
        let state = self.load(key).await?;
        Ok(state.space_remaining + TOKEN_EPSILON >= permits as f64)
    }

    async fn clear(&self, key: &str) -> Result<(), RateLimitError> {
        self.cache.delete(&self.bucket_key(key)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::clock::ManualClock;

    fn limiter(bucket_size: u32, leak_rate_per_minute: f64) -> (Arc<ManualClock>, TokenBucketLimiter) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let cache = Arc::new(InMemoryCache::with_clock(clock.clone()));
        let limiter = TokenBucketLimiter::new(
            RateLimiterName::Messages,
            RateLimiterConfig::new(bucket_size, leak_rate_per_minute),
            cache,
            clock.clone(),
            "leaky_bucket::",
        );
        (clock, limiter)
    }

    #[tokio::test]
    async fn test_accepts_capacity_then_rejects() {
        let (_, limiter) = limiter(10, 10.0);
        for _ in 0..10 {
            limiter.validate("alice").await.unwrap();
        }

        let err = limiter.validate("alice").await.unwrap_err();
        let retry_after = err.retry_after().unwrap();
        assert!(retry_after > Duration::ZERO);
        // One token at 10/min leaks back in 6 seconds
        assert_eq!(retry_after, Duration::from_secs(6));
    }

    #[tokio::test]
    async fn test_full_refill_restores_capacity() {
        let (clock, limiter) = limiter(7, 3.0);
        for _ in 0..7 {
            limiter.validate("alice").await.unwrap();
        }
        assert!(limiter.validate("alice").await.is_err());

        clock.advance(limiter.config().full_refill());
        for _ in 0..7 {
            limiter.validate("alice").await.unwrap();
        }
        assert!(limiter.validate("alice").await.is_err());
    }

    #[tokio::test]
    async fn test_tokens_never_exceed_capacity() {
        let (clock, limiter) = limiter(3, 60.0);
        clock.advance(Duration::from_secs(3600));
        for _ in 0..3 {
            limiter.validate("alice").await.unwrap();
        }
        assert!(limiter.validate("alice").await.is_err());
    }

    #[tokio::test]
    async fn test_partial_refill() {
        let (clock, limiter) = limiter(2, 60.0);
        limiter.validate("alice").await.unwrap();
        limiter.validate("alice").await.unwrap();

        clock.advance(Duration::from_millis(999));
        assert!(limiter.validate("alice").await.is_err());

        clock.advance(Duration::from_millis(1));
        limiter.validate("alice").await.unwrap();
    }

    #[tokio::test]
    async fn test_cost_larger_than_remaining_is_rejected_without_spending() {
        let (_, limiter) = limiter(5, 60.0);
        limiter.validate_with_cost("alice", 3).await.unwrap();
        assert!(limiter.validate_with_cost("alice", 3).await.is_err());
        limiter.validate_with_cost("alice", 2).await.unwrap();
    }

    #[tokio::test]
    async fn test_has_available_permits_does_not_spend() {
        let (_, limiter) = limiter(1, 1.0);
        assert!(limiter.has_available_permits("alice", 1).await.unwrap());
        assert!(limiter.has_available_permits("alice", 1).await.unwrap());
        assert!(!limiter.has_available_permits("alice", 2).await.unwrap());

        limiter.validate("alice").await.unwrap();
        assert!(!limiter.has_available_permits("alice", 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_and_key_isolation() {
        let (_, limiter) = limiter(1, 1.0);
        limiter.validate("alice").await.unwrap();
        limiter.validate("bob").await.unwrap();
        assert!(limiter.validate("alice").await.is_err());

        limiter.clear("alice").await.unwrap();
        limiter.validate("alice").await.unwrap();
        assert!(limiter.validate("bob").await.is_err());
    }
}
