use anyhow::{Context, Result};
use async_trait::async_trait;
use courier_redis::RedisClient;
use std::time::Duration;

use super::SharedCache;

const RELEASE_LEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// `SharedCache` over a multiplexed Redis connection
#[derive(Clone)]
pub struct RedisCache {
    client: RedisClient,
    release_script: redis::Script,
}

impl RedisCache {
    pub fn new(client: RedisClient) -> Self {
        Self {
            client,
            release_script: RedisClient::create_script(RELEASE_LEASE_SCRIPT),
        }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        let client = RedisClient::connect(url)
            .await
            .context("Failed to connect to Redis")?;
        Ok(Self::new(client))
    }

    /// Set `ttl` when the key exists without an expiry
    async fn ensure_expiry(client: &mut RedisClient, key: &str, ttl: Duration) -> Result<()> {
        if client.ttl(key).await? == -1 {
            client.expire(key, ttl_secs(ttl)).await?;
        }
        Ok(())
    }
}

/// Whole seconds, rounded up so an entry never lapses before `ttl`
fn ttl_secs(ttl: Duration) -> i64 {
    ttl.as_millis().div_ceil(1000).max(1) as i64
}

#[async_trait]
impl SharedCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut client = self.client.clone();
        Ok(client.get(key).await?)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut client = self.client.clone();
        client.set_ex(key, value, ttl_secs(ttl) as u64).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut client = self.client.clone();
        client.del(key).await?;
        Ok(())
    }

    async fn add_to_set(&self, key: &str, member: &str, ttl: Duration) -> Result<u64> {
        let mut client = self.client.clone();
        client.sadd(key, member).await?;
        Self::ensure_expiry(&mut client, key, ttl).await?;
        Ok(client.scard(key).await?.max(0) as u64)
    }

    async fn incr_by(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64> {
        let mut client = self.client.clone();
        let value = client.incr_by(key, delta).await?;
        Self::ensure_expiry(&mut client, key, ttl).await?;
        Ok(value)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut client = self.client.clone();
        let secs = client.ttl(key).await?;
        Ok((secs > 0).then(|| Duration::from_secs(secs as u64)))
    }

    async fn acquire_lease(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let mut client = self.client.clone();
        let millis = ttl.as_millis().max(1) as u64;
        Ok(client.set_nx_px(key, holder, millis).await?)
    }

    async fn release_lease(&self, key: &str, holder: &str) -> Result<()> {
        let mut client = self.client.clone();
        let _: i64 = self
            .release_script
            .key(key)
            .arg(holder)
            .invoke_async(client.connection_mut())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_secs_rounds_up() {
        assert_eq!(ttl_secs(Duration::from_millis(1999)), 2);
        assert_eq!(ttl_secs(Duration::from_millis(2000)), 2);
        assert_eq!(ttl_secs(Duration::from_millis(1)), 1);
        assert_eq!(ttl_secs(Duration::ZERO), 1);
    }

    // Note: These tests require a running Redis instance
    // Run with: docker run -d -p 6379:6379 redis:7

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_incr_preserves_expiry() -> Result<()> {
        let cache = RedisCache::connect("redis://localhost:6379").await?;
        cache.delete("courier_test_incr").await?;

        assert_eq!(cache.incr_by("courier_test_incr", 5, Duration::from_secs(100)).await?, 5);
        assert_eq!(cache.incr_by("courier_test_incr", 5, Duration::from_secs(5000)).await?, 10);
        let ttl = cache.ttl("courier_test_incr").await?.unwrap();
        assert!(ttl <= Duration::from_secs(100));

        cache.delete("courier_test_incr").await?;
        Ok(())
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_lease_release_checks_holder() -> Result<()> {
        let cache = RedisCache::connect("redis://localhost:6379").await?;
        cache.delete("courier_test_lock").await?;

        assert!(cache.acquire_lease("courier_test_lock", "a", Duration::from_secs(5)).await?);
        cache.release_lease("courier_test_lock", "b").await?;
        assert!(!cache.acquire_lease("courier_test_lock", "b", Duration::from_secs(5)).await?);
        cache.release_lease("courier_test_lock", "a").await?;
        assert!(cache.acquire_lease("courier_test_lock", "b", Duration::from_secs(5)).await?);

        cache.delete("courier_test_lock").await?;
        Ok(())
    }
}
