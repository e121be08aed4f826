use std::sync::Arc;
use std::time::Duration;

use super::RateLimitError;
use crate::cache::SharedCache;

pub const UNSEALED_SENDER_CARDINALITY: &str = "unsealedSenderCardinality";

/// Bounds how many distinct destinations a sender reaches within a window.
///
/// The destination is recorded before the size check, so a repeat of an
/// already-counted destination never grows the set.
pub struct CardinalityRateLimiter {
    name: &'static str,
    cache: Arc<dyn SharedCache>,
    key_prefix: String,
}

impl CardinalityRateLimiter {
    pub fn new(name: &'static str, cache: Arc<dyn SharedCache>, key_prefix: impl Into<String>) -> Self {
        Self {
            name,
            cache,
            key_prefix: key_prefix.into(),
        }
    }

    fn set_key(&self, sender: &str) -> String {
        format!("{}{}", self.key_prefix, sender)
    }

    pub async fn validate(
        &self,
        sender: &str,
        destination: &str,
        max_cardinality: u32,
        window: Duration,
    ) -> Result<(), RateLimitError> {
        let key = self.set_key(sender);
        let cardinality = self.cache.add_to_set(&key, destination, window).await?;
        if cardinality <= max_cardinality as u64 {
            return Ok(());
        }

        Err(RateLimitError::Exceeded {
            limiter: self.name,
            retry_after: Some(self.cache.ttl(&key).await?.unwrap_or(window)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::clock::ManualClock;

    const WINDOW: Duration = Duration::from_secs(86_400);

    fn limiter() -> (Arc<ManualClock>, CardinalityRateLimiter) {
        let clock = Arc::new(ManualClock::new(0));
        let cache = Arc::new(InMemoryCache::with_clock(clock.clone()));
        (
            clock,
            CardinalityRateLimiter::new(UNSEALED_SENDER_CARDINALITY, cache, "unsealed_sender::"),
        )
    }

    #[tokio::test]
    async fn test_first_k_destinations_pass() {
        let (_, limiter) = limiter();
        for destination in ["a", "b", "c"] {
            limiter.validate("alice", destination, 3, WINDOW).await.unwrap();
        }

        let err = limiter.validate("alice", "d", 3, WINDOW).await.unwrap_err();
        assert_eq!(err.retry_after(), Some(WINDOW));
    }

    #[tokio::test]
    async fn test_repeats_never_count_twice() {
        let (_, limiter) = limiter();
        for _ in 0..10 {
            limiter.validate("alice", "a", 2, WINDOW).await.unwrap();
            limiter.validate("alice", "b", 2, WINDOW).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_window_expiry_resets_set() {
        let (clock, limiter) = limiter();
        limiter.validate("alice", "a", 1, WINDOW).await.unwrap();
        assert!(limiter.validate("alice", "b", 1, WINDOW).await.is_err());

        clock.advance(WINDOW);
        limiter.validate("alice", "b", 1, WINDOW).await.unwrap();
    }

    #[tokio::test]
    async fn test_senders_are_independent() {
        let (_, limiter) = limiter();
        limiter.validate("alice", "a", 1, WINDOW).await.unwrap();
        limiter.validate("bob", "b", 1, WINDOW).await.unwrap();
    }
}
