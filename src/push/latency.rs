use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::cache::SharedCache;
use crate::clock::Clock;
use crate::metrics::Metrics;

/// Pending timestamps are dropped after a day
const LATENCY_TTL: Duration = Duration::from_secs(86_400);

/// Measures the time between a wake-up push and the device fetching its queue
pub struct PushLatencyManager {
    cache: Arc<dyn SharedCache>,
    clock: Arc<dyn Clock>,
    key_prefix: String,
    metrics: Arc<Metrics>,
}

impl PushLatencyManager {
    pub fn new(
        cache: Arc<dyn SharedCache>,
        clock: Arc<dyn Clock>,
        key_prefix: impl Into<String>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            cache,
            clock,
            key_prefix: key_prefix.into(),
            metrics,
        }
    }

    fn key(&self, account: Uuid, device_id: u32) -> String {
        format!("{}{}::{}", self.key_prefix, account, device_id)
    }

    pub async fn record_push_sent(&self, account: Uuid, device_id: u32) {
        let now = self.clock.now_millis().to_string();
        if let Err(e) = self.cache.set_ex(&self.key(account, device_id), &now, LATENCY_TTL).await {
            tracing::warn!(error = %e, "Failed to record push timestamp");
        }
    }

    /// Observe and forget the pending push timestamp, if any
    pub async fn record_queue_read(&self, account: Uuid, device_id: u32) -> Option<Duration> {
        let key = self.key(account, device_id);
        let sent_at: i64 = match self.cache.get(&key).await {
            Ok(Some(raw)) => raw.parse().ok()?,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read push timestamp");
                return None;
            }
        };

        if let Err(e) = self.cache.delete(&key).await {
            tracing::warn!(error = %e, "Failed to clear push timestamp");
        }

        let elapsed = Duration::from_millis((self.clock.now_millis() - sent_at).max(0) as u64);
        self.metrics.push_latency.observe(elapsed.as_secs_f64());
        Some(elapsed)
    }
}
