use std::sync::Arc;

use courier_types::Account;

use super::{DynamicRateLimiter, LimiterDeps, RateLimitError, RateLimiter, RateLimiterName};
use crate::metrics::flag;

/// Daily pre-key fetch allowance per requesting account.
///
/// Enforcement is a rollout toggle: while off, overruns are only counted.
pub struct PreKeyRateLimiter {
    limiter: Arc<DynamicRateLimiter>,
    deps: LimiterDeps,
}

impl PreKeyRateLimiter {
    pub fn new(limiter: Arc<DynamicRateLimiter>, deps: LimiterDeps) -> Self {
        Self { limiter, deps }
    }

    fn enforced(&self) -> bool {
        self.deps.config.configuration().challenge.pre_key_limit_enforced
    }

    pub async fn validate(&self, account: &Account) -> Result<(), RateLimitError> {
        match self.limiter.validate(&account.uuid.to_string()).await {
            Err(RateLimitError::Exceeded { limiter, retry_after }) => {
                let enforced = self.enforced();
                self.deps
                    .metrics
                    .rate_limit_exceeded
                    .with_label_values(&[RateLimiterName::PreKeys.as_str(), flag(enforced)])
                    .inc();
                if enforced {
                    Err(RateLimitError::Exceeded { limiter, retry_after })
                } else {
                    Ok(())
                }
            }
            other => other,
        }
    }

    pub async fn handle_rate_limit_reset(&self, account: &Account) -> Result<(), RateLimitError> {
        self.deps
            .metrics
            .rate_limit_resets
            .with_label_values(&[RateLimiterName::PreKeys.as_str(), flag(self.enforced())])
            .inc();
        self.limiter.clear(&account.uuid.to_string()).await
    }
}
