// ============================================================================
// Abuse Challenge Manager
// ============================================================================
//
// Lets a rate-limited sender prove good faith and get its limits relaxed.
//
// - push challenge: a token pushed to the master device, echoed back
// - captcha: a solution checked by the external verifier
//
// Every attempt and every success spends from its own limiter. A solved
// challenge resets the primary limiter and notifies the dependent limiters.
//
// ============================================================================

mod captcha;
mod push_challenge;
mod user_agent;

pub use captcha::{CaptchaVerifier, HCaptchaVerifier};
pub use push_challenge::PushChallengeManager;
pub use user_agent::{ClientVersion, UserAgent, UserAgentError};

use courier_config::DynamicConfigProvider;
use courier_error::{AppError, AppResult};
use courier_types::Account;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::limiter::{
    PreKeyRateLimiter, RateLimiter, RateLimiters, UnsealedSenderRateLimiter,
};
use crate::metrics::{flag, Metrics};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeOption {
    #[serde(rename = "pushChallenge")]
    PushChallenge,
    #[serde(rename = "captcha")]
    Captcha,
}

impl ChallengeOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeOption::PushChallenge => "pushChallenge",
            ChallengeOption::Captcha => "captcha",
        }
    }
}

pub struct RateLimitChallengeManager {
    push_challenges: PushChallengeManager,
    captcha: Arc<dyn CaptchaVerifier>,
    limiters: Arc<RateLimiters>,
    pre_keys: Arc<PreKeyRateLimiter>,
    unsealed_sender: Arc<UnsealedSenderRateLimiter>,
    config: Arc<dyn DynamicConfigProvider>,
    metrics: Arc<Metrics>,
}

impl RateLimitChallengeManager {
    pub fn new(
        push_challenges: PushChallengeManager,
        captcha: Arc<dyn CaptchaVerifier>,
        limiters: Arc<RateLimiters>,
        pre_keys: Arc<PreKeyRateLimiter>,
        unsealed_sender: Arc<UnsealedSenderRateLimiter>,
        config: Arc<dyn DynamicConfigProvider>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            push_challenges,
            captcha,
            limiters,
            pre_keys,
            unsealed_sender,
            config,
            metrics,
        }
    }

    fn record_answer(&self, option: ChallengeOption, success: bool) {
        self.metrics
            .challenge_answers
            .with_label_values(&[option.as_str(), if success { "success" } else { "failure" }])
            .inc();
    }

    pub async fn send_push_challenge(&self, account: &Account) -> AppResult<()> {
        self.push_challenges.send_challenge(account).await
    }

    pub async fn answer_push_challenge(&self, account: &Account, challenge: &str) -> AppResult<()> {
        let key = account.uuid.to_string();
        self.limiters.push_challenge_attempt.validate(&key).await?;

        let solved = self.push_challenges.answer_challenge(account, challenge).await?;
        self.record_answer(ChallengeOption::PushChallenge, solved);
        if !solved {
            return Err(AppError::validation("Invalid push challenge"));
        }

        self.limiters.push_challenge_success.validate(&key).await?;
        self.reset_rate_limits(account).await
    }

    pub async fn answer_captcha(&self, account: &Account, captcha: &str, remote_ip: &str) -> AppResult<()> {
        let key = account.uuid.to_string();
        self.limiters.captcha_challenge_attempt.validate(&key).await?;

        let solved = self.captcha.verify(captcha, remote_ip).await?;
        self.record_answer(ChallengeOption::Captcha, solved);
        if !solved {
            return Err(AppError::validation("Invalid captcha"));
        }

        self.limiters.captcha_challenge_success.validate(&key).await?;
        self.reset_rate_limits(account).await
    }

    /// Clear the primary limiter and notify the dependent limiters
    pub async fn reset_rate_limits(&self, account: &Account) -> AppResult<()> {
        let key = account.uuid.to_string();
        self.limiters.rate_limit_reset.validate(&key).await?;
        self.limiters.messages.clear(&key).await?;

        self.pre_keys.handle_rate_limit_reset(account).await?;
        self.unsealed_sender.handle_rate_limit_reset(account).await?;
        Ok(())
    }

    /// Challenge types the account can still spend an attempt and a success on
    pub async fn get_challenge_options(&self, account: &Account) -> AppResult<Vec<ChallengeOption>> {
        let key = account.uuid.to_string();
        let mut options = Vec::new();

        if self.limiters.push_challenge_attempt.has_available_permits(&key, 1).await?
            && self.limiters.push_challenge_success.has_available_permits(&key, 1).await?
        {
            options.push(ChallengeOption::PushChallenge);
        }
        if self.limiters.captcha_challenge_attempt.has_available_permits(&key, 1).await?
            && self.limiters.captcha_challenge_success.has_available_permits(&key, 1).await?
        {
            options.push(ChallengeOption::Captcha);
        }

        Ok(options)
    }

    /// Whether the client is new enough to understand a challenge response
    pub fn is_client_supported(&self, user_agent: Option<&str>) -> bool {
        let Some(user_agent) = user_agent.and_then(|ua| ua.parse::<UserAgent>().ok()) else {
            return false;
        };
        let configuration = self.config.configuration();
        let Some(minimum) = configuration
            .challenge
            .client_supported_versions
            .get(&user_agent.platform)
        else {
            return false;
        };

        match minimum.parse::<ClientVersion>() {
            Ok(minimum) => user_agent.version >= minimum,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid minimum client version in dynamic configuration");
                false
            }
        }
    }

    /// Escalate a rate limit rejection to a challenge when the client can
    /// answer one and any challenge type is still available
    pub async fn rate_limit_response(
        &self,
        account: &Account,
        user_agent: Option<&str>,
        retry_after: Option<Duration>,
    ) -> AppError {
        let supported = self.is_client_supported(user_agent);
        self.metrics
            .challenge_issued
            .with_label_values(&[flag(supported)])
            .inc();
        if !supported {
            return AppError::RateLimitExceeded { retry_after };
        }

        match self.get_challenge_options(account).await {
            // The token only correlates this 428 with the client's answer;
            // answers are matched to the authenticated account, not the token
            Ok(options) if !options.is_empty() => AppError::ChallengeRequired {
                token: Uuid::new_v4().to_string(),
                options: options.iter().map(|o| o.as_str().to_string()).collect(),
                retry_after,
            },
            Ok(_) => AppError::RateLimitExceeded { retry_after },
            Err(e) => e,
        }
    }
}
