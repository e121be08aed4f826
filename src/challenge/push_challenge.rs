use chrono::{Duration, Utc};
use courier_error::{AppError, AppResult};
use courier_types::Account;
use rand::RngCore;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::accounts::AccountDirectory;
use crate::push::PushNotificationManager;

/// Lifetime of an issued push challenge token
const CHALLENGE_TTL_MINUTES: i64 = 5;

/// Issues push challenge tokens to the master device and checks answers
pub struct PushChallengeManager {
    accounts: Arc<dyn AccountDirectory>,
    push: Arc<PushNotificationManager>,
}

impl PushChallengeManager {
    pub fn new(accounts: Arc<dyn AccountDirectory>, push: Arc<PushNotificationManager>) -> Self {
        Self { accounts, push }
    }

    pub async fn send_challenge(&self, account: &Account) -> AppResult<()> {
        let master = account
            .master_device()
            .ok_or_else(|| AppError::not_found("Account has no master device"))?;
        let pushable = master
            .delivery_channel()
            .and_then(|channel| master.push_token(channel))
            .is_some();
        if !pushable {
            return Err(AppError::not_found("Master device has no push token"));
        }

        let mut raw = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut raw);
        let token = hex::encode(raw);

        self.accounts
            .set_push_challenge(
                account.uuid,
                &token,
                Utc::now() + Duration::minutes(CHALLENGE_TTL_MINUTES),
            )
            .await?;

        self.push.send_challenge_notification(account, master, &token)
    }

    /// True when `answer` matches the outstanding token; a match consumes it
    pub async fn answer_challenge(&self, account: &Account, answer: &str) -> AppResult<bool> {
        let Some(stored) = self.accounts.get_push_challenge(account.uuid).await? else {
            return Ok(false);
        };

        let matches: bool = stored.as_bytes().ct_eq(answer.as_bytes()).into();
        if matches {
            self.accounts.clear_push_challenge(account.uuid).await?;
        }
        Ok(matches)
    }
}
