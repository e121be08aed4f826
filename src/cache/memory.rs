use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::SharedCache;
use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<i64>,
}

/// Process-local `SharedCache`; expiry follows the injected clock
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Live entry for `key`, dropping it first if it has expired
    fn live<'a>(&self, entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
        let now = self.clock.now_millis();
        let expired = entries
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|at| at <= now);
        if expired {
            entries.remove(key);
        }
        entries.get_mut(key)
    }

    fn deadline(&self, ttl: Duration) -> i64 {
        self.clock.now_millis() + ttl.as_millis() as i64
    }
}

#[async_trait]
impl SharedCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries();
        match self.live(&mut entries, key) {
            Some(Entry {
                value: Value::Text(text),
                ..
            }) => Ok(Some(text.clone())),
            Some(_) => anyhow::bail!("WRONGTYPE: {} holds a set", key),
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let expires_at = Some(self.deadline(ttl));
        self.entries().insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }

    async fn add_to_set(&self, key: &str, member: &str, ttl: Duration) -> Result<u64> {
        let deadline = self.deadline(ttl);
        let mut entries = self.entries();
        if self.live(&mut entries, key).is_none() {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Set(HashSet::new()),
                    expires_at: None,
                },
            );
        }
        let entry = self
            .live(&mut entries, key)
            .ok_or_else(|| anyhow::anyhow!("set {} vanished", key))?;
        let Value::Set(members) = &mut entry.value else {
            anyhow::bail!("WRONGTYPE: {} is not a set", key);
        };
        members.insert(member.to_string());
        let size = members.len() as u64;
        entry.expires_at.get_or_insert(deadline);
        Ok(size)
    }

    async fn incr_by(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64> {
        let deadline = self.deadline(ttl);
        let mut entries = self.entries();
        let (current, expires_at) = match self.live(&mut entries, key) {
            Some(Entry {
                value: Value::Text(text),
                expires_at,
            }) => (text.parse::<i64>()?, *expires_at),
            Some(_) => anyhow::bail!("WRONGTYPE: {} is not an integer", key),
            None => (0, None),
        };
        let value = current + delta;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Some(expires_at.unwrap_or(deadline)),
            },
        );
        Ok(value)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = self.clock.now_millis();
        let mut entries = self.entries();
        Ok(self
            .live(&mut entries, key)
            .and_then(|e| e.expires_at)
            .map(|at| Duration::from_millis((at - now).max(0) as u64)))
    }

    async fn acquire_lease(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let expires_at = Some(self.deadline(ttl));
        let mut entries = self.entries();
        if self.live(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(holder.to_string()),
                expires_at,
            },
        );
        Ok(true)
    }

    async fn release_lease(&self, key: &str, holder: &str) -> Result<()> {
        let mut entries = self.entries();
        let owned = matches!(
            self.live(&mut entries, key),
            Some(Entry { value: Value::Text(current), .. }) if current.as_str() == holder
        );
        if owned {
            entries.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn cache() -> (Arc<ManualClock>, InMemoryCache) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let cache = InMemoryCache::with_clock(clock.clone());
        (clock, cache)
    }

    #[tokio::test]
    async fn test_values_expire() {
        let (clock, cache) = cache();
        cache.set_ex("k", "v", Duration::from_secs(10)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        clock.advance(Duration::from_secs(10));
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_counts_distinct_members() {
        let (clock, cache) = cache();
        let ttl = Duration::from_secs(60);
        assert_eq!(cache.add_to_set("s", "a", ttl).await.unwrap(), 1);
        assert_eq!(cache.add_to_set("s", "a", ttl).await.unwrap(), 1);
        assert_eq!(cache.add_to_set("s", "b", ttl).await.unwrap(), 2);

        clock.advance(Duration::from_secs(30));
        cache.add_to_set("s", "c", ttl).await.unwrap();
        assert_eq!(cache.ttl("s").await.unwrap(), Some(Duration::from_secs(30)));

        clock.advance(Duration::from_secs(30));
        assert_eq!(cache.add_to_set("s", "a", ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_incr_keeps_first_expiry() {
        let (clock, cache) = cache();
        assert_eq!(cache.incr_by("n", 50, Duration::from_secs(100)).await.unwrap(), 50);
        clock.advance(Duration::from_secs(40));
        assert_eq!(cache.incr_by("n", 50, Duration::from_secs(100)).await.unwrap(), 100);
        assert_eq!(cache.ttl("n").await.unwrap(), Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_lease_is_exclusive_until_released() {
        let (clock, cache) = cache();
        let ttl = Duration::from_secs(5);
        assert!(cache.acquire_lease("l", "a", ttl).await.unwrap());
        assert!(!cache.acquire_lease("l", "b", ttl).await.unwrap());

        cache.release_lease("l", "b").await.unwrap();
        assert!(!cache.acquire_lease("l", "b", ttl).await.unwrap());

        cache.release_lease("l", "a").await.unwrap();
        assert!(cache.acquire_lease("l", "b", ttl).await.unwrap());

        clock.advance(ttl);
        assert!(cache.acquire_lease("l", "c", ttl).await.unwrap());
    }
}
