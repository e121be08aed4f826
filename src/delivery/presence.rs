use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::cache::SharedCache;

/// Whether a device currently holds a live connection. Advisory only: the
/// answer may be stale by the time it is used.
#[async_trait]
pub trait PresenceOracle: Send + Sync {
    async fn is_present(&self, account: Uuid, device_id: u32) -> Result<bool>;
}

/// Presence markers in the shared cache, written by the connection layer
pub struct CachePresence {
    cache: Arc<dyn SharedCache>,
    key_prefix: String,
}

impl CachePresence {
    pub fn new(cache: Arc<dyn SharedCache>, key_prefix: impl Into<String>) -> Self {
        Self {
            cache,
            key_prefix: key_prefix.into(),
        }
    }

    fn key(&self, account: Uuid, device_id: u32) -> String {
        format!("{}{}::{}", self.key_prefix, account, device_id)
    }

    /// Record a connection; the marker lapses unless refreshed within `ttl`
    pub async fn mark_present(&self, account: Uuid, device_id: u32, ttl: Duration) -> Result<()> {
        self.cache.set_ex(&self.key(account, device_id), "1", ttl).await
    }

    pub async fn clear(&self, account: Uuid, device_id: u32) -> Result<()> {
        self.cache.delete(&self.key(account, device_id)).await
    }
}

#[async_trait]
impl PresenceOracle for CachePresence {
    async fn is_present(&self, account: Uuid, device_id: u32) -> Result<bool> {
        Ok(self.cache.get(&self.key(account, device_id)).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn test_presence_expires() {
        let clock = Arc::new(ManualClock::new(0));
        let presence = CachePresence::new(Arc::new(InMemoryCache::with_clock(clock.clone())), "presence::");
        let account = Uuid::new_v4();

        assert!(!presence.is_present(account, 1).await.unwrap());
        presence
            .mark_present(account, 1, Duration::from_secs(30))
            .await
            .unwrap();
        assert!(presence.is_present(account, 1).await.unwrap());
        assert!(!presence.is_present(account, 2).await.unwrap());

        clock.advance(Duration::from_secs(31));
        assert!(!presence.is_present(account, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_clear() {
        let presence = CachePresence::new(Arc::new(InMemoryCache::new()), "presence::");
        let account = Uuid::new_v4();
        presence
            .mark_present(account, 1, Duration::from_secs(30))
            .await
            .unwrap();

        presence.clear(account, 1).await.unwrap();
        assert!(!presence.is_present(account, 1).await.unwrap());
    }
}
