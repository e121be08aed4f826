// ============================================================================
// Application Context
// ============================================================================
//
// The composition root. Every collaborator is built here exactly once and
// handed to the components that need it; nothing reaches for a global.
//
// `Backends` holds the swappable infrastructure (Redis/Postgres or
// in-memory), `AppContext` the wired pipeline the routes run against.
//
// ============================================================================

use anyhow::{Context, Result};
use courier_config::{Config, DynamicConfigProvider, StaticConfigProvider};
use courier_redis::RedisClient;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::accounts::{AccountDirectory, InMemoryAccounts, PostgresAccounts};
use crate::cache::{InMemoryCache, RedisCache, SharedCache};
use crate::challenge::{CaptchaVerifier, HCaptchaVerifier, PushChallengeManager, RateLimitChallengeManager};
use crate::clock::{Clock, SystemClock};
use crate::delivery::{
    CachePresence, InMemoryMessagesStore, MessageSender, MessagesStore, PresenceOracle,
    RedisMessagesStore,
};
use crate::fanout::FanoutExecutor;
use crate::limiter::{LimiterDeps, PreKeyRateLimiter, RateLimiters, UnsealedSenderRateLimiter};
use crate::metrics::Metrics;
use crate::push::{
    ApnsGateway, FcmGateway, PushFeedbackProcessor, PushGateway, PushLatencyManager,
    PushNotificationManager, ResilientGateway,
};

/// Infrastructure the pipeline runs on
pub struct Backends {
    pub cache: Arc<dyn SharedCache>,
    pub accounts: Arc<dyn AccountDirectory>,
    pub messages: Arc<dyn MessagesStore>,
    pub presence: Arc<dyn PresenceOracle>,
    pub captcha: Arc<dyn CaptchaVerifier>,
    pub push_gateways: Vec<Arc<dyn PushGateway>>,
    pub dynamic_config: Arc<dyn DynamicConfigProvider>,
    pub clock: Arc<dyn Clock>,
}

impl Backends {
    /// Single-node backends: process-local state, no push vendors
    pub fn in_memory(config: &Config) -> Result<Self> {
        let cache: Arc<dyn SharedCache> = Arc::new(InMemoryCache::new());
        Ok(Self {
            presence: Arc::new(CachePresence::new(
                cache.clone(),
                config.redis_key_prefixes.presence.clone(),
            )),
            cache,
            accounts: Arc::new(InMemoryAccounts::new()),
            messages: Arc::new(InMemoryMessagesStore::new()),
            captcha: Arc::new(HCaptchaVerifier::new(config.captcha.clone())?),
            push_gateways: Vec::new(),
            dynamic_config: Arc::new(StaticConfigProvider::default()),
            clock: Arc::new(SystemClock),
        })
    }

    /// Redis and Postgres when configured, in-memory otherwise; push
    /// vendors as enabled
    pub async fn from_config(config: &Config, dynamic_config: Arc<dyn DynamicConfigProvider>) -> Result<Self> {
        let mut backends = Self::in_memory(config)?;
        backends.dynamic_config = dynamic_config;

        match &config.redis_url {
            Some(url) => {
                let client = RedisClient::connect(url)
                    .await
                    .context("Failed to connect to Redis")?;
                let cache: Arc<dyn SharedCache> = Arc::new(RedisCache::new(client.clone()));
                backends.presence = Arc::new(CachePresence::new(
                    cache.clone(),
                    config.redis_key_prefixes.presence.clone(),
                ));
                backends.cache = cache;
                backends.messages = Arc::new(RedisMessagesStore::new(
                    client,
                    config.redis_key_prefixes.queue.clone(),
                    config.redis_key_prefixes.ephemeral.clone(),
                    config.message_ttl_seconds(),
                ));
                tracing::info!("Using Redis for shared cache and message queues");
            }
            None => tracing::warn!("REDIS_URL not set, using in-memory cache and queues (single node only)"),
        }

        match &config.database_url {
            Some(url) => {
                backends.accounts = Arc::new(
                    PostgresAccounts::connect(url)
                        .await
                        .context("Failed to connect to database")?,
                );
                tracing::info!("Using Postgres account directory");
            }
            None => tracing::warn!("DATABASE_URL not set, using in-memory account directory"),
        }

        if config.apns.enabled {
            let gateway: Arc<dyn PushGateway> = Arc::new(ApnsGateway::new(config.apns.clone())?);
            backends
                .push_gateways
                .push(Arc::new(ResilientGateway::new(gateway, config.push_resilience.clone())));
        } else {
            tracing::info!("APNs is disabled");
        }
        if config.fcm.enabled {
            let gateway: Arc<dyn PushGateway> = Arc::new(FcmGateway::new(config.fcm.clone())?);
            backends
                .push_gateways
                .push(Arc::new(ResilientGateway::new(gateway, config.push_resilience.clone())));
        } else {
            tracing::info!("FCM is disabled");
        }

        Ok(backends)
    }
}

/// Application context containing the wired pipeline
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub metrics: Arc<Metrics>,
    pub accounts: Arc<dyn AccountDirectory>,
    pub messages: Arc<dyn MessagesStore>,
    pub limiters: Arc<RateLimiters>,
    pub unsealed_sender: Arc<UnsealedSenderRateLimiter>,
    pub pre_keys: Arc<PreKeyRateLimiter>,
    pub challenges: Arc<RateLimitChallengeManager>,
    pub sender: Arc<MessageSender>,
    pub fanout: Arc<FanoutExecutor>,
    pub push_latency: Arc<PushLatencyManager>,
}

impl AppContext {
    /// Wire every component. Spawns the push feedback processor, so this
    /// must run inside a tokio runtime.
    pub fn new(config: Config, backends: Backends) -> Result<Self> {
        let config = Arc::new(config);
        let metrics = Arc::new(Metrics::new()?);
        let hash_salt = config.logging.hash_salt.clone();

        let deps = LimiterDeps {
            cache: backends.cache.clone(),
            clock: backends.clock.clone(),
            config: backends.dynamic_config.clone(),
            metrics: metrics.clone(),
            key_prefixes: config.redis_key_prefixes.clone(),
        };
        let limiters = Arc::new(RateLimiters::new(&deps));
        let pre_keys = Arc::new(PreKeyRateLimiter::new(limiters.pre_keys.clone(), deps.clone()));
        let unsealed_sender = Arc::new(UnsealedSenderRateLimiter::new(deps));

        let (feedback_tx, feedback_rx) = mpsc::channel(config.push_resilience.feedback_queue_size.max(1));
        PushFeedbackProcessor::new(
            backends.accounts.clone(),
            backends.clock.clone(),
            metrics.clone(),
            hash_salt.clone(),
        )
        .spawn(feedback_rx);

        let push_latency = Arc::new(PushLatencyManager::new(
            backends.cache.clone(),
            backends.clock.clone(),
            config.redis_key_prefixes.push_latency.clone(),
            metrics.clone(),
        ));
        let push = Arc::new(PushNotificationManager::new(
            backends.push_gateways,
            feedback_tx,
            push_latency.clone(),
            hash_salt.clone(),
        ));

        let challenges = Arc::new(RateLimitChallengeManager::new(
            PushChallengeManager::new(backends.accounts.clone(), push.clone()),
            backends.captcha,
            limiters.clone(),
            pre_keys.clone(),
            unsealed_sender.clone(),
            backends.dynamic_config,
            metrics.clone(),
        ));

        let sender = Arc::new(MessageSender::new(
            backends.messages.clone(),
            backends.presence,
            push,
            metrics.clone(),
            hash_salt,
        ));
        let fanout = Arc::new(FanoutExecutor::new(
            backends.accounts.clone(),
            sender.clone(),
            config.fanout_workers,
            metrics.clone(),
        ));

        Ok(Self {
            config,
            metrics,
            accounts: backends.accounts,
            messages: backends.messages,
            limiters,
            unsealed_sender,
            pre_keys,
            challenges,
            sender,
            fanout,
            push_latency,
        })
    }
}
