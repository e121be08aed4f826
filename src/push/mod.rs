// ============================================================================
// Push Notification Gateways
// ============================================================================
//
// Wake-up pushes to offline devices through the vendor APIs.
//
// - apns.rs / fcm.rs: one `PushGateway` per vendor
// - circuit_breaker.rs + retry.rs: resilience wrapper shared by both
// - feedback.rs: classifies outcomes and mutates account records
// - latency.rs: push dispatch -> queue fetch latency
//
// Sends never block the request path: `PushNotificationManager` spawns the
// vendor call and forwards its outcome to the feedback processor over an
// mpsc channel.
//
// ============================================================================

mod apns;
mod circuit_breaker;
mod feedback;
mod fcm;
mod latency;
mod retry;

pub use apns::ApnsGateway;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use fcm::FcmGateway;
pub use feedback::{PushFeedback, PushFeedbackProcessor, TOKEN_REFRESH_GRACE};
pub use latency::PushLatencyManager;
pub use retry::{retry_with_backoff, Retryable};

use async_trait::async_trait;
use courier_config::PushResilienceConfig;
use courier_error::{AppError, AppResult};
use courier_types::{Account, DeliveryChannel, Device};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::utils::log_safe_id;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushKind {
    /// "You have messages waiting"
    NewMessage,
    /// Carries a push challenge token the client echoes back
    Challenge(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushNotification {
    pub token: String,
    pub channel: DeliveryChannel,
    pub destination: Uuid,
    pub device_id: u32,
    pub urgent: bool,
    pub kind: PushKind,
}

/// Vendor response, collapsed into one shape for every gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    /// The token is no longer valid for this app
    Unregistered,
    /// The vendor issued a canonical replacement token
    TokenRotated(String),
    /// Permanent rejection unrelated to the token
    Rejected(String),
}

#[derive(Debug, Clone, Error)]
pub enum PushGatewayError {
    #[error("push transport error: {0}")]
    Transport(String),

    #[error("push vendor unavailable: {0}")]
    Unavailable(String),

    #[error("push request timed out")]
    Timeout,

    #[error("circuit breaker {0} is open")]
    CircuitOpen(&'static str),

    #[error("no gateway configured for {0}")]
    NotConfigured(&'static str),
}

impl Retryable for PushGatewayError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            PushGatewayError::Transport(_)
                | PushGatewayError::Unavailable(_)
                | PushGatewayError::Timeout
        )
    }
}

impl From<CircuitBreakerError<PushGatewayError>> for PushGatewayError {
    fn from(err: CircuitBreakerError<PushGatewayError>) -> Self {
        match err {
            CircuitBreakerError::Open(name) => PushGatewayError::CircuitOpen(name),
            CircuitBreakerError::Inner(e) => e,
        }
    }
}

#[async_trait]
pub trait PushGateway: Send + Sync {
    fn channel(&self) -> DeliveryChannel;

    async fn send(&self, notification: &PushNotification) -> Result<PushOutcome, PushGatewayError>;
}

/// Vendor gateway behind a circuit breaker, a request timeout and retries
pub struct ResilientGateway {
    inner: Arc<dyn PushGateway>,
    breaker: CircuitBreaker,
    policy: PushResilienceConfig,
}

impl ResilientGateway {
    pub fn new(inner: Arc<dyn PushGateway>, policy: PushResilienceConfig) -> Self {
        let breaker = CircuitBreaker::new(
            inner.channel().as_str(),
            policy.failure_threshold,
            policy.reset_timeout,
        );
        Self {
            inner,
            breaker,
            policy,
        }
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.breaker.state().await
    }

    async fn attempt(&self, notification: &PushNotification) -> Result<PushOutcome, PushGatewayError> {
        let result = self
            .breaker
            .call(|| async {
                tokio::time::timeout(self.policy.request_timeout, self.inner.send(notification))
                    .await
                    .unwrap_or(Err(PushGatewayError::Timeout))
            })
            .await;
        result.map_err(PushGatewayError::from)
    }
}

#[async_trait]
impl PushGateway for ResilientGateway {
    fn channel(&self) -> DeliveryChannel {
        self.inner.channel()
    }

    async fn send(&self, notification: &PushNotification) -> Result<PushOutcome, PushGatewayError> {
        retry_with_backoff(
            self.channel().as_str(),
            self.policy.max_retries,
            self.policy.initial_backoff,
            || self.attempt(notification),
        )
        .await
    }
}

/// Dispatches pushes and routes their outcomes to the feedback processor
pub struct PushNotificationManager {
    gateways: HashMap<DeliveryChannel, Arc<dyn PushGateway>>,
    feedback: mpsc::Sender<PushFeedback>,
    latency: Arc<PushLatencyManager>,
    hash_salt: String,
}

impl PushNotificationManager {
    pub fn new(
        gateways: Vec<Arc<dyn PushGateway>>,
        feedback: mpsc::Sender<PushFeedback>,
        latency: Arc<PushLatencyManager>,
        hash_salt: impl Into<String>,
    ) -> Self {
        let gateways = gateways
            .into_iter()
            .map(|gateway| (gateway.channel(), gateway))
            .collect();
        Self {
            gateways,
            feedback,
            latency,
            hash_salt: hash_salt.into(),
        }
    }

    /// Wake `device` so it fetches its queue. Fire-and-forget.
    pub async fn send_new_message_notification(&self, account: &Account, device: &Device, urgent: bool) {
        let Some(notification) = Self::notification_for(account, device, urgent, PushKind::NewMessage) else {
            tracing::debug!(
                account_id = %log_safe_id(&account.uuid.to_string(), &self.hash_salt),
                device_id = device.id,
                "Device has no push token, skipping wake-up"
            );
            return;
        };

        self.latency.record_push_sent(account.uuid, device.id).await;
        self.dispatch(notification);
    }

    /// Deliver a push challenge token. Fails only when the device cannot be
    /// pushed to at all; vendor failures arrive asynchronously.
    pub fn send_challenge_notification(
        &self,
        account: &Account,
        device: &Device,
        challenge: &str,
    ) -> AppResult<()> {
        let notification = Self::notification_for(
            account,
            device,
            true,
            PushKind::Challenge(challenge.to_string()),
        )
        .ok_or_else(|| AppError::not_found("Device has no push token"))?;

        if !self.gateways.contains_key(&notification.channel) {
            return Err(AppError::not_found(format!(
                "Push channel {} is not configured",
                notification.channel.as_str()
            )));
        }

        self.dispatch(notification);
        Ok(())
    }

    fn notification_for(
        account: &Account,
        device: &Device,
        urgent: bool,
        kind: PushKind,
    ) -> Option<PushNotification> {
        let channel = device.delivery_channel()?;
        let token = device.push_token(channel)?;
        Some(PushNotification {
            token: token.to_string(),
            channel,
            destination: account.uuid,
            device_id: device.id,
            urgent,
            kind,
        })
    }

    fn dispatch(&self, notification: PushNotification) {
        let gateway = self.gateways.get(&notification.channel).cloned();
        let feedback = self.feedback.clone();

        tokio::spawn(async move {
            let result = match gateway {
                Some(gateway) => gateway.send(&notification).await,
                None => Err(PushGatewayError::NotConfigured(notification.channel.as_str())),
            };
            if feedback
                .send(PushFeedback {
                    notification,
                    result,
                })
                .await
                .is_err()
            {
                tracing::warn!("Push feedback processor stopped, dropping outcome");
            }
        });
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Gateway that records every notification and answers with a fixed outcome
    pub struct RecordingGateway {
        channel: DeliveryChannel,
        outcome: Mutex<Result<PushOutcome, PushGatewayError>>,
        pub sent: Mutex<Vec<PushNotification>>,
    }

    impl RecordingGateway {
        pub fn new(channel: DeliveryChannel) -> Self {
            Self {
                channel,
                outcome: Mutex::new(Ok(PushOutcome::Accepted)),
                sent: Mutex::new(Vec::new()),
            }
        }

        pub fn respond_with(&self, outcome: Result<PushOutcome, PushGatewayError>) {
            *self.outcome.lock().unwrap() = outcome;
        }

        pub fn sent(&self) -> Vec<PushNotification> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PushGateway for RecordingGateway {
        fn channel(&self) -> DeliveryChannel {
            self.channel
        }

        async fn send(&self, notification: &PushNotification) -> Result<PushOutcome, PushGatewayError> {
            self.sent.lock().unwrap().push(notification.clone());
            self.outcome.lock().unwrap().clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::RecordingGateway;
    use super::*;
    use crate::cache::{InMemoryCache, SharedCache};
    use crate::clock::ManualClock;
    use crate::metrics::Metrics;
    use std::time::Duration;

    fn manager(
        gateway: Arc<RecordingGateway>,
    ) -> (PushNotificationManager, mpsc::Receiver<PushFeedback>, Arc<InMemoryCache>) {
        let cache = Arc::new(InMemoryCache::new());
        let latency = Arc::new(PushLatencyManager::new(
            cache.clone(),
            Arc::new(ManualClock::new(1_000)),
            "push_latency::",
            Arc::new(Metrics::new().unwrap()),
        ));
        let (tx, rx) = mpsc::channel(8);
        let gateways: Vec<Arc<dyn PushGateway>> = vec![gateway];
        (PushNotificationManager::new(gateways, tx, latency, "salt"), rx, cache)
    }

    fn android_account() -> Account {
        let mut device = Device::new(1, 7);
        device.fcm_token = Some("fcm-token".to_string());
        Account::new(Uuid::new_v4(), "+15550001").with_device(device)
    }

    #[tokio::test]
    async fn test_new_message_push_reaches_feedback() {
        let gateway = Arc::new(RecordingGateway::new(DeliveryChannel::Fcm));
        let (manager, mut rx, cache) = manager(gateway.clone());
        let account = android_account();

        manager
            .send_new_message_notification(&account, account.device(1).unwrap(), true)
            .await;

        let feedback = rx.recv().await.unwrap();
        assert_eq!(feedback.notification.token, "fcm-token");
        assert_eq!(feedback.notification.kind, PushKind::NewMessage);
        assert_eq!(feedback.result.unwrap(), PushOutcome::Accepted);
        assert_eq!(gateway.sent().len(), 1);

        let key = format!("push_latency::{}::1", account.uuid);
        assert_eq!(cache.get(&key).await.unwrap().as_deref(), Some("1000"));
    }

    #[tokio::test]
    async fn test_device_without_token_is_skipped() {
        let gateway = Arc::new(RecordingGateway::new(DeliveryChannel::Fcm));
        let (manager, _rx, cache) = manager(gateway.clone());
        let mut device = Device::new(1, 7);
        device.fetches_messages = true;
        let account = Account::new(Uuid::new_v4(), "+15550002").with_device(device);

        manager
            .send_new_message_notification(&account, account.device(1).unwrap(), true)
            .await;
        tokio::task::yield_now().await;

        assert!(gateway.sent().is_empty());
        let key = format!("push_latency::{}::1", account.uuid);
        assert!(cache.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_challenge_requires_configured_channel() {
        let gateway = Arc::new(RecordingGateway::new(DeliveryChannel::Apn));
        let (manager, _rx, _) = manager(gateway);
        let account = android_account();

        let result = manager.send_challenge_notification(&account, account.device(1).unwrap(), "tok");
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_challenge_carries_token() {
        let gateway = Arc::new(RecordingGateway::new(DeliveryChannel::Fcm));
        let (manager, mut rx, _) = manager(gateway);
        let account = android_account();

        manager
            .send_challenge_notification(&account, account.device(1).unwrap(), "tok")
            .unwrap();

        let feedback = rx.recv().await.unwrap();
        assert_eq!(feedback.notification.kind, PushKind::Challenge("tok".to_string()));
    }

    #[tokio::test]
    async fn test_resilient_gateway_retries_transient_errors() {
        let gateway = Arc::new(RecordingGateway::new(DeliveryChannel::Fcm));
        gateway.respond_with(Err(PushGatewayError::Unavailable("503".to_string())));
        let policy = PushResilienceConfig {
            failure_threshold: 10,
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            ..PushResilienceConfig::default()
        };
        let resilient = ResilientGateway::new(gateway.clone(), policy);
        let notification = PushNotification {
            token: "t".to_string(),
            channel: DeliveryChannel::Fcm,
            destination: Uuid::new_v4(),
            device_id: 1,
            urgent: true,
            kind: PushKind::NewMessage,
        };

        assert!(matches!(
            resilient.send(&notification).await,
            Err(PushGatewayError::Unavailable(_))
        ));
        assert_eq!(gateway.sent().len(), 3);
    }

    #[tokio::test]
    async fn test_resilient_gateway_opens_circuit() {
        let gateway = Arc::new(RecordingGateway::new(DeliveryChannel::Fcm));
        gateway.respond_with(Err(PushGatewayError::Transport("reset".to_string())));
        let policy = PushResilienceConfig {
            failure_threshold: 2,
            max_retries: 0,
            reset_timeout: Duration::from_secs(60),
            ..PushResilienceConfig::default()
        };
        let resilient = ResilientGateway::new(gateway.clone(), policy);
        let notification = PushNotification {
            token: "t".to_string(),
            channel: DeliveryChannel::Fcm,
            destination: Uuid::new_v4(),
            device_id: 1,
            urgent: false,
            kind: PushKind::NewMessage,
        };

        assert!(resilient.send(&notification).await.is_err());
        assert!(resilient.send(&notification).await.is_err());
        assert_eq!(resilient.circuit_state().await, CircuitState::Open);

        assert!(matches!(
            resilient.send(&notification).await,
            Err(PushGatewayError::CircuitOpen("fcm"))
        ));
        assert_eq!(gateway.sent().len(), 2);
    }
}
