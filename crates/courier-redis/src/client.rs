//! Redis client implementation with connection management

use crate::Result;
use redis::{aio::ConnectionManager, AsyncCommands};

/// Redis client with automatic reconnection
///
/// Cloning is cheap: every clone shares the same multiplexed connection.
#[derive(Clone)]
pub struct RedisClient {
    conn: ConnectionManager,
}

impl RedisClient {
    /// Connect to Redis server
    ///
    /// Supports both redis:// and rediss:// (TLS) URLs
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Mutable connection handle for scripts and raw commands
    pub fn connection_mut(&mut self) -> &mut ConnectionManager {
        &mut self.conn
    }

    // ============================================================================
    // Key-Value Operations
    // ============================================================================

    /// GET - Get value by key
    pub async fn get<T: redis::FromRedisValue>(&mut self, key: &str) -> Result<Option<T>> {
        self.conn.get(key).await
    }

    /// SETEX - Set key with expiry in seconds
    pub async fn set_ex<V>(&mut self, key: &str, value: V, seconds: u64) -> Result<()>
    where
        V: redis::ToRedisArgs + Send + Sync,
    {
        self.conn.set_ex(key, value, seconds).await
    }

    /// SET key value NX PX millis - returns true when the key was created
    pub async fn set_nx_px<V>(&mut self, key: &str, value: V, millis: u64) -> Result<bool>
    where
        V: redis::ToRedisArgs + Send + Sync,
    {
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis)
            .query_async(&mut self.conn)
            .await?;
        Ok(reply.is_some())
    }

    /// DEL - Delete one or more keys
    pub async fn del<K>(&mut self, keys: K) -> Result<i64>
    where
        K: redis::ToRedisArgs + Send + Sync,
    {
        self.conn.del(keys).await
    }

    /// EXPIRE - Set expiry time in seconds
    pub async fn expire(&mut self, key: &str, seconds: i64) -> Result<bool> {
        self.conn.expire(key, seconds).await
    }

    /// TTL - Get time to live in seconds (-2 missing, -1 no expiry)
    pub async fn ttl(&mut self, key: &str) -> Result<i64> {
        self.conn.ttl(key).await
    }

    // ============================================================================
    // Atomic Operations
    // ============================================================================

    /// INCRBY - Increment by specific amount (keeps any existing TTL)
    pub async fn incr_by(&mut self, key: &str, delta: i64) -> Result<i64> {
        self.conn.incr(key, delta).await
    }

    // ============================================================================
    // Set Operations
    // ============================================================================

    /// SADD - Add member to set, returns number of newly added members
    pub async fn sadd<V>(&mut self, key: &str, member: V) -> Result<i64>
    where
        V: redis::ToRedisArgs + Send + Sync,
    {
        self.conn.sadd(key, member).await
    }

    /// SCARD - Number of members in a set
    pub async fn scard(&mut self, key: &str) -> Result<i64> {
        self.conn.scard(key).await
    }

    // ============================================================================
    // Streams & Pub/Sub
    // ============================================================================

    /// XADD key MAXLEN ~ max_len * field value...
    pub async fn xadd(
        &mut self,
        key: &str,
        max_len: usize,
        fields: &[(&str, Vec<u8>)],
    ) -> Result<String> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(key).arg("MAXLEN").arg("~").arg(max_len).arg("*");
        for (field, value) in fields {
            cmd.arg(*field).arg(value.as_slice());
        }
        cmd.query_async(&mut self.conn).await
    }

    /// XRANGE key - + COUNT count, flattened into (id, fields)
    pub async fn xrange(
        &mut self,
        key: &str,
        count: usize,
    ) -> Result<Vec<(String, Vec<(String, Vec<u8>)>)>> {
        redis::cmd("XRANGE")
            .arg(key)
            .arg("-")
            .arg("+")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut self.conn)
            .await
    }

    /// XDEL - returns the number of entries removed
    pub async fn xdel(&mut self, key: &str, ids: &[String]) -> Result<i64> {
        if ids.is_empty() {
            return Ok(0);
        }
        redis::cmd("XDEL").arg(key).arg(ids).query_async(&mut self.conn).await
    }

    /// PUBLISH - returns the number of subscribers that received the message
    pub async fn publish(&mut self, channel: &str, payload: Vec<u8>) -> Result<i64> {
        self.conn.publish(channel, payload).await
    }

    // ============================================================================
    // Lua Scripts
    // ============================================================================

    /// Build a Lua script handle; invoke with `connection_mut()`
    pub fn create_script(code: &str) -> redis::Script {
        redis::Script::new(code)
    }
}
