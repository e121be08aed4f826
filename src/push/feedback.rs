// ============================================================================
// Push Feedback Processor
// ============================================================================
//
// Consumes vendor outcomes off the network path and applies their side
// effects to the account directory:
//
// - Unregistered: drop the token, unless the device refreshed it recently
// - TokenRotated: store the vendor's canonical token
// - anything else: metric only
//
// ============================================================================

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{PushGatewayError, PushNotification, PushOutcome};
use crate::accounts::AccountDirectory;
use crate::clock::Clock;
use crate::metrics::Metrics;
use crate::utils::log_safe_id;

/// A token refreshed within this window is assumed to be newer than the one
/// the vendor rejected
pub const TOKEN_REFRESH_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct PushFeedback {
    pub notification: PushNotification,
    pub result: Result<PushOutcome, PushGatewayError>,
}

pub struct PushFeedbackProcessor {
    accounts: Arc<dyn AccountDirectory>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    hash_salt: String,
}

impl PushFeedbackProcessor {
    pub fn new(
        accounts: Arc<dyn AccountDirectory>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
        hash_salt: impl Into<String>,
    ) -> Self {
        Self {
            accounts,
            clock,
            metrics,
            hash_salt: hash_salt.into(),
        }
    }

    /// Run on a dedicated task until every sender is dropped
    pub fn spawn(self, mut rx: mpsc::Receiver<PushFeedback>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(feedback) = rx.recv().await {
                self.handle(feedback).await;
            }
            tracing::info!("Push feedback processor stopped");
        })
    }

    pub async fn handle(&self, feedback: PushFeedback) {
        let PushFeedback {
            notification,
            result,
        } = feedback;
        let channel = notification.channel;
        let account_id = log_safe_id(&notification.destination.to_string(), &self.hash_salt);

        let outcome = match result {
            Ok(PushOutcome::Accepted) => "accepted",
            Ok(PushOutcome::Unregistered) => {
                self.handle_unregistered(&notification, &account_id).await
            }
            Ok(PushOutcome::TokenRotated(token)) => {
                match self
                    .accounts
                    .replace_push_token(notification.destination, notification.device_id, channel, &token)
                    .await
                {
                    Ok(()) => {
                        tracing::info!(
                            account_id = %account_id,
                            device_id = notification.device_id,
                            channel = channel.as_str(),
                            "Replaced push token with canonical id"
                        );
                        "token_rotated"
                    }
                    Err(e) => {
                        tracing::error!(error = %e, account_id = %account_id, "Failed to replace push token");
                        "update_failed"
                    }
                }
            }
            Ok(PushOutcome::Rejected(reason)) => {
                tracing::debug!(
                    account_id = %account_id,
                    channel = channel.as_str(),
                    reason = %reason,
                    "Push rejected by vendor"
                );
                "rejected"
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    account_id = %account_id,
                    channel = channel.as_str(),
                    "Push delivery failed"
                );
                "failed"
            }
        };

        self.metrics
            .push_feedback
            .with_label_values(&[channel.as_str(), outcome])
            .inc();
    }

    async fn handle_unregistered(&self, notification: &PushNotification, account_id: &str) -> &'static str {
        let account = match self.accounts.get_by_uuid(notification.destination).await {
            Ok(Some(account)) => account,
            Ok(None) => return "unregistered",
            Err(e) => {
                tracing::error!(error = %e, account_id = %account_id, "Failed to load account for push feedback");
                return "update_failed";
            }
        };
        let Some(device) = account.device(notification.device_id) else {
            return "unregistered";
        };

        // Only the token that was rejected may be removed
        if device.push_token(notification.channel) != Some(notification.token.as_str()) {
            return "unregistered";
        }

        let now = self.clock.now_millis();
        let recently_refreshed = device
            .push_token_updated_at
            .map(|updated_at| now - updated_at.timestamp_millis() < TOKEN_REFRESH_GRACE.as_millis() as i64)
            .unwrap_or(false);
        if recently_refreshed {
            tracing::debug!(
                account_id = %account_id,
                device_id = device.id,
                "Push token refreshed recently, keeping it"
            );
            return "unregistered_recent";
        }

        match self
            .accounts
            .clear_push_token(notification.destination, notification.device_id, notification.channel)
            .await
        {
            Ok(()) => {
                tracing::info!(
                    account_id = %account_id,
                    device_id = device.id,
                    channel = notification.channel.as_str(),
                    "Removed unregistered push token"
                );
                "unregistered"
            }
            Err(e) => {
                tracing::error!(error = %e, account_id = %account_id, "Failed to clear push token");
                "update_failed"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::InMemoryAccounts;
    use crate::clock::ManualClock;
    use crate::push::PushKind;
    use chrono::{TimeZone, Utc};
    use courier_types::{Account, DeliveryChannel, Device};
    use uuid::Uuid;

    const NOW_MILLIS: i64 = 1_700_000_000_000;

    struct Fixture {
        processor: PushFeedbackProcessor,
        accounts: Arc<InMemoryAccounts>,
        metrics: Arc<Metrics>,
        clock: Arc<ManualClock>,
        uuid: Uuid,
    }

    async fn fixture(updated_ago: Option<chrono::Duration>) -> Fixture {
        let accounts = Arc::new(InMemoryAccounts::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let clock = Arc::new(ManualClock::new(NOW_MILLIS));
        let now = Utc.timestamp_millis_opt(NOW_MILLIS).unwrap();
        let mut device = Device::new(1, 7);
        device.fcm_token = Some("old-token".to_string());
        device.push_token_updated_at = updated_ago.map(|ago| now - ago);
        let account = Account::new(Uuid::new_v4(), "+15550100").with_device(device);
        let uuid = account.uuid;
        accounts.upsert(account).await;

        Fixture {
            processor: PushFeedbackProcessor::new(accounts.clone(), clock.clone(), metrics.clone(), "salt"),
            accounts,
            metrics,
            clock,
            uuid,
        }
    }

    async fn setup(updated_ago: Option<chrono::Duration>) -> (PushFeedbackProcessor, Arc<InMemoryAccounts>, Arc<Metrics>, Uuid) {
        let f = fixture(updated_ago).await;
        (f.processor, f.accounts, f.metrics, f.uuid)
    }

    fn feedback(uuid: Uuid, token: &str, result: Result<PushOutcome, PushGatewayError>) -> PushFeedback {
        PushFeedback {
            notification: PushNotification {
                token: token.to_string(),
                channel: DeliveryChannel::Fcm,
                destination: uuid,
                device_id: 1,
                urgent: true,
                kind: PushKind::NewMessage,
            },
            result,
        }
    }

    async fn fcm_token(accounts: &InMemoryAccounts, uuid: Uuid) -> Option<String> {
        accounts
            .get_by_uuid(uuid)
            .await
            .unwrap()
            .unwrap()
            .device(1)
            .unwrap()
            .fcm_token
            .clone()
    }

    #[tokio::test]
    async fn test_unregistered_clears_stale_token() {
        let (processor, accounts, metrics, uuid) = setup(Some(chrono::Duration::minutes(5))).await;

        processor
            .handle(feedback(uuid, "old-token", Ok(PushOutcome::Unregistered)))
            .await;

        assert_eq!(fcm_token(&accounts, uuid).await, None);
        assert_eq!(
            metrics.push_feedback.with_label_values(&["fcm", "unregistered"]).get(),
            1
        );
    }

    #[tokio::test]
    async fn test_recently_refreshed_token_kept() {
        let (processor, accounts, _, uuid) = setup(Some(chrono::Duration::seconds(2))).await;

        processor
            .handle(feedback(uuid, "old-token", Ok(PushOutcome::Unregistered)))
            .await;

        assert_eq!(fcm_token(&accounts, uuid).await.as_deref(), Some("old-token"));
    }

    #[tokio::test]
    async fn test_refresh_window_follows_clock() {
        let f = fixture(Some(chrono::Duration::zero())).await;

        f.clock.advance(Duration::from_secs(9));
        f.processor
            .handle(feedback(f.uuid, "old-token", Ok(PushOutcome::Unregistered)))
            .await;
        assert_eq!(fcm_token(&f.accounts, f.uuid).await.as_deref(), Some("old-token"));

        f.clock.advance(Duration::from_secs(2));
        f.processor
            .handle(feedback(f.uuid, "old-token", Ok(PushOutcome::Unregistered)))
            .await;
        assert_eq!(fcm_token(&f.accounts, f.uuid).await, None);
        assert_eq!(
            f.metrics.push_feedback.with_label_values(&["fcm", "unregistered_recent"]).get(),
            1
        );
    }

    #[tokio::test]
    async fn test_different_token_not_cleared() {
        let (processor, accounts, _, uuid) = setup(None).await;

        processor
            .handle(feedback(uuid, "some-other-token", Ok(PushOutcome::Unregistered)))
            .await;

        assert_eq!(fcm_token(&accounts, uuid).await.as_deref(), Some("old-token"));
    }

    #[tokio::test]
    async fn test_rotation_replaces_token() {
        let (processor, accounts, _, uuid) = setup(None).await;

        processor
            .handle(feedback(
                uuid,
                "old-token",
                Ok(PushOutcome::TokenRotated("canonical".to_string())),
            ))
            .await;

        assert_eq!(fcm_token(&accounts, uuid).await.as_deref(), Some("canonical"));
    }

    #[tokio::test]
    async fn test_transient_failure_is_metric_only() {
        let (processor, accounts, metrics, uuid) = setup(None).await;

        processor
            .handle(feedback(uuid, "old-token", Err(PushGatewayError::Timeout)))
            .await;

        assert_eq!(fcm_token(&accounts, uuid).await.as_deref(), Some("old-token"));
        assert_eq!(metrics.push_feedback.with_label_values(&["fcm", "failed"]).get(), 1);
    }

    #[tokio::test]
    async fn test_spawned_processor_drains_channel() {
        let (processor, accounts, _, uuid) = setup(None).await;
        let (tx, rx) = mpsc::channel(4);
        let handle = processor.spawn(rx);

        tx.send(feedback(uuid, "old-token", Ok(PushOutcome::Unregistered)))
            .await
            .unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(fcm_token(&accounts, uuid).await, None);
    }
}
