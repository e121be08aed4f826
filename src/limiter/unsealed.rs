use std::sync::Arc;
use std::time::Duration;

use courier_types::Account;
use uuid::Uuid;

use super::cardinality::UNSEALED_SENDER_CARDINALITY;
use super::{CardinalityRateLimiter, LimiterDeps, RateLimitError};
use crate::metrics::flag;

/// Distinct-destination limit for identified senders, with a per-account
/// bonus raised by solved challenges
pub struct UnsealedSenderRateLimiter {
    cardinality: CardinalityRateLimiter,
    deps: LimiterDeps,
}

impl UnsealedSenderRateLimiter {
    pub fn new(deps: LimiterDeps) -> Self {
        Self {
            cardinality: CardinalityRateLimiter::new(
                UNSEALED_SENDER_CARDINALITY,
                deps.cache.clone(),
                deps.key_prefixes.unsealed_sender.clone(),
            ),
            deps,
        }
    }

    fn bonus_key(&self, uuid: &Uuid) -> String {
        format!("{}{}", self.deps.key_prefixes.unsealed_sender_bonus, uuid)
    }

    async fn bonus(&self, uuid: &Uuid) -> Result<u32, RateLimitError> {
        let raw = self.deps.cache.get(&self.bonus_key(uuid)).await?;
        Ok(raw.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    /// Current ceiling: configured default plus any bonus in effect
    pub async fn max_cardinality(&self, sender: &Account) -> Result<u32, RateLimitError> {
        let base = self.deps.config.configuration().unsealed_sender.default_cardinality;
        Ok(base.saturating_add(self.bonus(&sender.uuid).await?))
    }

    /// Record `destination`; rejects only while enforcement is switched on
    pub async fn validate(&self, sender: &Account, destination: &Uuid) -> Result<(), RateLimitError> {
        let configuration = self.deps.config.configuration();
        let enforced = configuration.challenge.unsealed_sender_limit_enforced;
        let window = Duration::from_secs(configuration.unsealed_sender.window_secs);
        let max_cardinality = self.max_cardinality(sender).await?;

        match self
            .cardinality
            .validate(
                &sender.uuid.to_string(),
                &destination.to_string(),
                max_cardinality,
                window,
            )
            .await
        {
            Err(RateLimitError::Exceeded { limiter, retry_after }) => {
                self.deps
                    .metrics
                    .rate_limit_exceeded
                    .with_label_values(&[UNSEALED_SENDER_CARDINALITY, flag(enforced)])
                    .inc();
                if enforced {
                    Err(RateLimitError::Exceeded { limiter, retry_after })
                } else {
                    tracing::debug!(
                        max_cardinality = max_cardinality,
                        "Unsealed sender limit exceeded, not enforced"
                    );
                    Ok(())
                }
            }
            other => other,
        }
    }

    /// Raise the sender's ceiling after a solved challenge.
    ///
    /// The bonus keeps the remaining lifetime of a bonus already in effect;
    /// a fresh bonus lives for the configured TTL.
    pub async fn handle_rate_limit_reset(&self, account: &Account) -> Result<(), RateLimitError> {
        let configuration = self.deps.config.configuration();
        let enforced = configuration.challenge.unsealed_sender_limit_enforced;
        self.deps
            .metrics
            .rate_limit_resets
            .with_label_values(&[UNSEALED_SENDER_CARDINALITY, flag(enforced)])
            .inc();

        let settings = &configuration.unsealed_sender;
        self.deps
            .cache
            .incr_by(
                &self.bonus_key(&account.uuid),
                settings.permit_increment as i64,
                Duration::from_secs(settings.bonus_ttl_secs),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SharedCache;
    use crate::limiter::test_support::harness;
    use courier_config::DynamicConfiguration;

    fn configuration(enforced: bool) -> DynamicConfiguration {
        let mut configuration = DynamicConfiguration::default();
        configuration.unsealed_sender.default_cardinality = 2;
        configuration.unsealed_sender.permit_increment = 1;
        configuration.unsealed_sender.bonus_ttl_secs = 3600;
        configuration.challenge.unsealed_sender_limit_enforced = enforced;
        configuration
    }

    fn sender() -> Account {
        Account::new(Uuid::new_v4(), "alice")
    }

    #[tokio::test]
    async fn test_enforced_limit_rejects() {
        let h = harness(configuration(true));
        let limiter = UnsealedSenderRateLimiter::new(h.deps.clone());
        let alice = sender();

        limiter.validate(&alice, &Uuid::new_v4()).await.unwrap();
        limiter.validate(&alice, &Uuid::new_v4()).await.unwrap();
        assert!(limiter.validate(&alice, &Uuid::new_v4()).await.is_err());
        assert_eq!(
            h.metrics
                .rate_limit_exceeded
                .with_label_values(&[UNSEALED_SENDER_CARDINALITY, "true"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_shadow_mode_only_counts() {
        let h = harness(configuration(false));
        let limiter = UnsealedSenderRateLimiter::new(h.deps.clone());
        let alice = sender();

        for _ in 0..4 {
            limiter.validate(&alice, &Uuid::new_v4()).await.unwrap();
        }
        assert_eq!(
            h.metrics
                .rate_limit_exceeded
                .with_label_values(&[UNSEALED_SENDER_CARDINALITY, "false"])
                .get(),
            2
        );
    }

    #[tokio::test]
    async fn test_reset_raises_ceiling_and_keeps_ttl() {
        let h = harness(configuration(true));
        let limiter = UnsealedSenderRateLimiter::new(h.deps.clone());
        let alice = sender();

        limiter.validate(&alice, &Uuid::new_v4()).await.unwrap();
        limiter.validate(&alice, &Uuid::new_v4()).await.unwrap();
        let blocked = Uuid::new_v4();
        assert!(limiter.validate(&alice, &blocked).await.is_err());

        limiter.handle_rate_limit_reset(&alice).await.unwrap();
        assert_eq!(limiter.max_cardinality(&alice).await.unwrap(), 3);
        limiter.validate(&alice, &blocked).await.unwrap();

        h.clock.advance(Duration::from_secs(600));
        limiter.handle_rate_limit_reset(&alice).await.unwrap();
        assert_eq!(limiter.max_cardinality(&alice).await.unwrap(), 4);
        let bonus_key = format!("unsealed_sender_bonus::{}", alice.uuid);
        assert_eq!(
            h.cache.ttl(&bonus_key).await.unwrap(),
            Some(Duration::from_secs(3000))
        );

        h.clock.advance(Duration::from_secs(3000));
        assert_eq!(limiter.max_cardinality(&alice).await.unwrap(), 2);
    }
}
