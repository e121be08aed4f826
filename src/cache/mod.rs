// ============================================================================
// Shared Cache
// ============================================================================
//
// Key/value + set store shared by every server instance. Limiter state,
// unsealed-sender destination sets, bonus counters, presence markers and
// push-latency timestamps all live here.
//
// - redis.rs: Redis-backed implementation (production)
// - memory.rs: process-local implementation (single node, tests)
//
// ============================================================================

mod memory;
mod redis;

pub use self::memory::InMemoryCache;
pub use self::redis::RedisCache;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait SharedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Add `member` to the set at `key` and return the set's size afterwards.
    /// `ttl` is applied only when the set has no expiry yet.
    async fn add_to_set(&self, key: &str, member: &str, ttl: Duration) -> Result<u64>;

    /// Increment an integer value. `ttl` is applied only when the key has no
    /// expiry yet, so an existing expiry is preserved.
    async fn incr_by(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64>;

    /// Remaining lifetime; `None` when the key is missing or never expires
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Try to take an exclusive lease on `key` for `ttl`
    async fn acquire_lease(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool>;

    /// Release a lease, but only if `holder` still owns it
    async fn release_lease(&self, key: &str, holder: &str) -> Result<()>;
}
