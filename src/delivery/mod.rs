// ============================================================================
// Delivery Router
// ============================================================================
//
// Decides where an accepted envelope goes for one destination device:
//
// - online (ephemeral) sends reach a connected device or are dropped
// - everything else is queued durably, then a wake-up push is sent if the
//   device is not connected
//
// The presence re-check after the insert races with the device connecting;
// a duplicate push is possible and tolerated (delivery is at-least-once).
//
// ============================================================================

mod presence;
mod store;

pub use presence::{CachePresence, PresenceOracle};
pub use store::{InMemoryMessagesStore, MessagesStore, RedisMessagesStore};

use courier_error::{AppError, AppResult};
use courier_types::{Account, Device, Envelope};
use std::sync::Arc;

use crate::metrics::{flag, Metrics};
use crate::push::PushNotificationManager;
use crate::utils::log_safe_id;

pub struct MessageSender {
    messages: Arc<dyn MessagesStore>,
    presence: Arc<dyn PresenceOracle>,
    push: Arc<PushNotificationManager>,
    metrics: Arc<Metrics>,
    hash_salt: String,
}

impl MessageSender {
    pub fn new(
        messages: Arc<dyn MessagesStore>,
        presence: Arc<dyn PresenceOracle>,
        push: Arc<PushNotificationManager>,
        metrics: Arc<Metrics>,
        hash_salt: impl Into<String>,
    ) -> Self {
        Self {
            messages,
            presence,
            push,
            metrics,
            hash_salt: hash_salt.into(),
        }
    }

    /// Route one envelope to one device of `account`.
    ///
    /// Fails only when the device is the master device and exposes no
    /// channel at all, or when the durable store rejects the write.
    pub async fn send_message(
        &self,
        account: &Account,
        device: &Device,
        envelope: &Envelope,
        online: bool,
    ) -> AppResult<()> {
        let Some(channel) = device.delivery_channel() else {
            let account_id = log_safe_id(&account.uuid.to_string(), &self.hash_salt);
            if device.is_master() {
                tracing::warn!(account_id = %account_id, "Master device has no delivery channel");
                return Err(AppError::NotDeliverable(format!(
                    "device {} has no delivery channel",
                    device.id
                )));
            }
            tracing::debug!(
                account_id = %account_id,
                device_id = device.id,
                "Skipping device without delivery channel"
            );
            return Ok(());
        };

        let client_present = if online {
            let present = self.is_present(account, device).await;
            if present {
                self.messages
                    .insert_ephemeral(account.uuid, device.id, envelope)
                    .await?;
            }
            present
        } else {
            self.messages.insert(account.uuid, device.id, envelope).await?;

            let present = self.is_present(account, device).await;
            if !present {
                self.push
                    .send_new_message_notification(account, device, envelope.urgent)
                    .await;
            }
            present
        };

        self.metrics
            .messages_routed
            .with_label_values(&[channel.as_str(), flag(online), flag(client_present)])
            .inc();

        Ok(())
    }

    async fn is_present(&self, account: &Account, device: &Device) -> bool {
        match self.presence.is_present(account.uuid, device.id).await {
            Ok(present) => present,
            Err(e) => {
                tracing::warn!(error = %e, "Presence check failed, assuming offline");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::clock::ManualClock;
    use crate::push::test_support::RecordingGateway;
    use crate::push::{PushFeedback, PushGateway, PushLatencyManager};
    use courier_types::{DeliveryChannel, EnvelopeType};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    struct Fixture {
        sender: MessageSender,
        store: Arc<InMemoryMessagesStore>,
        presence: Arc<CachePresence>,
        feedback: mpsc::Receiver<PushFeedback>,
        metrics: Arc<Metrics>,
    }

    fn fixture() -> Fixture {
        let cache = Arc::new(InMemoryCache::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let store = Arc::new(InMemoryMessagesStore::new());
        let presence = Arc::new(CachePresence::new(cache.clone(), "presence::"));
        let latency = Arc::new(PushLatencyManager::new(
            cache,
            Arc::new(ManualClock::new(0)),
            "push_latency::",
            metrics.clone(),
        ));
        let (tx, rx) = mpsc::channel(8);
        let gateways: Vec<Arc<dyn PushGateway>> = vec![Arc::new(RecordingGateway::new(DeliveryChannel::Fcm))];
        let push = Arc::new(PushNotificationManager::new(gateways, tx, latency, "salt"));

        Fixture {
            sender: MessageSender::new(store.clone(), presence.clone(), push, metrics.clone(), "salt"),
            store,
            presence,
            feedback: rx,
            metrics,
        }
    }

    fn account_with(device: Device) -> Account {
        Account::new(Uuid::new_v4(), "+15550200").with_device(device)
    }

    fn android(id: u32) -> Device {
        let mut device = Device::new(id, 1);
        device.fcm_token = Some(format!("token-{}", id));
        device
    }

    fn envelope(destination: Uuid) -> Envelope {
        Envelope {
            guid: Uuid::new_v4(),
            envelope_type: EnvelopeType::Ciphertext,
            timestamp: 1,
            server_timestamp: 1,
            source_uuid: None,
            source_device: None,
            destination_uuid: destination,
            content: vec![9],
            urgent: true,
            ephemeral: false,
        }
    }

    #[tokio::test]
    async fn test_online_absent_drops_silently() {
        let mut f = fixture();
        let account = account_with(android(1));
        let device = account.device(1).unwrap();

        f.sender
            .send_message(&account, device, &envelope(account.uuid), true)
            .await
            .unwrap();

        assert_eq!(f.store.total_delivered().await, 0);
        assert!(f.feedback.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_online_present_goes_ephemeral() {
        let mut f = fixture();
        let account = account_with(android(1));
        f.presence
            .mark_present(account.uuid, 1, Duration::from_secs(60))
            .await
            .unwrap();

        f.sender
            .send_message(&account, account.device(1).unwrap(), &envelope(account.uuid), true)
            .await
            .unwrap();

        assert_eq!(f.store.ephemeral(account.uuid, 1).await.len(), 1);
        assert!(f.store.queued(account.uuid, 1).await.is_empty());
        assert!(f.feedback.try_recv().is_err());
        assert_eq!(
            f.metrics
                .messages_routed
                .with_label_values(&["fcm", "true", "true"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_offline_absent_queues_and_pushes_once() {
        let mut f = fixture();
        let account = account_with(android(1));

        f.sender
            .send_message(&account, account.device(1).unwrap(), &envelope(account.uuid), false)
            .await
            .unwrap();

        assert_eq!(f.store.queued(account.uuid, 1).await.len(), 1);
        let pushed = f.feedback.recv().await.unwrap();
        assert_eq!(pushed.notification.device_id, 1);
        tokio::task::yield_now().await;
        assert!(f.feedback.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_offline_present_queues_without_push() {
        let mut f = fixture();
        let account = account_with(android(1));
        f.presence
            .mark_present(account.uuid, 1, Duration::from_secs(60))
            .await
            .unwrap();

        f.sender
            .send_message(&account, account.device(1).unwrap(), &envelope(account.uuid), false)
            .await
            .unwrap();

        assert_eq!(f.store.queued(account.uuid, 1).await.len(), 1);
        assert!(f.feedback.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_channelless_master_is_fatal() {
        let f = fixture();
        let account = account_with(Device::new(1, 1));

        let result = f
            .sender
            .send_message(&account, account.device(1).unwrap(), &envelope(account.uuid), false)
            .await;

        assert!(matches!(result, Err(AppError::NotDeliverable(_))));
        assert_eq!(f.store.total_delivered().await, 0);
    }

    #[tokio::test]
    async fn test_channelless_linked_device_is_skipped() {
        let f = fixture();
        let account = account_with(android(1)).with_device(Device::new(2, 1));

        f.sender
            .send_message(&account, account.device(2).unwrap(), &envelope(account.uuid), false)
            .await
            .unwrap();

        assert_eq!(f.store.total_delivered().await, 0);
    }
}
