//! Redis client implementation with connection management

use crate::Result;
use redis::{AsyncCommands, aio::ConnectionManager};

/// Redis client with automatic reconnection
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

    /// Get connection manager (for advanced operations)
    pub fn connection_mut(&mut self) -> &mut ConnectionManager {
        &mut self.conn
    }

    /// PING - used by health checks
    pub async fn ping(&mut self) -> Result<()> {
        let _: String = redis::cmd("PING").query_async(&mut self.conn).await?;
        Ok(())
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

    /// SET key value NX EX seconds
    ///
    /// Returns `true` if the key was created, `false` if it already existed.
    pub async fn set_nx_ex<V>(&mut self, key: &str, value: V, seconds: u64) -> Result<bool>
    where
        V: redis::ToRedisArgs + Send + Sync,
    {
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(seconds)
            .query_async(&mut self.conn)
            .await?;
        Ok(reply.is_some())
    }

    /// SET key value NX PX millis
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

    /// SET key value XX KEEPTTL - overwrite an existing key, keeping its expiry
    ///
    /// Returns `false` if the key no longer exists.
    pub async fn set_xx_keepttl<V>(&mut self, key: &str, value: V) -> Result<bool>
    where
        V: redis::ToRedisArgs + Send + Sync,
    {
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("XX")
            .arg("KEEPTTL")
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

    /// EXISTS - Check if key exists
    pub async fn exists(&mut self, key: &str) -> Result<bool> {
        self.conn.exists(key).await
    }

    // ============================================================================
    // Set Operations
    // ============================================================================

    /// SMEMBERS - All members of a set
    pub async fn smembers(&mut self, key: &str) -> Result<Vec<String>> {
        self.conn.smembers(key).await
    }

    /// SADD - Add member to set
    pub async fn sadd<V>(&mut self, key: &str, member: V) -> Result<i64>
    where
        V: redis::ToRedisArgs + Send + Sync,
    {
        self.conn.sadd(key, member).await
    }

    /// SREM - Remove member from set
    pub async fn srem<V>(&mut self, key: &str, member: V) -> Result<i64>
    where
        V: redis::ToRedisArgs + Send + Sync,
    {
        self.conn.srem(key, member).await
    }

    // ============================================================================
    // Pub/Sub
    // ============================================================================

    /// PUBLISH - returns the number of subscribers that received the message
    pub async fn publish<V>(&mut self, channel: &str, message: V) -> Result<i64>
    where
        V: redis::ToRedisArgs + Send + Sync,
    {
        self.conn.publish(channel, message).await
    }

    // ============================================================================
    // Lua Scripts
    // ============================================================================

    /// Execute Lua script
    /// Note: For complex scripts, consider using redis::Script directly
    pub fn create_script(code: &str) -> redis::Script {
        redis::Script::new(code)
    }

    /// Run a prepared script (EVALSHA with EVAL fallback)
    pub async fn run_script<T: redis::FromRedisValue>(
        &mut self,
        script: &redis::Script,
        keys: &[&str],
        args: &[&[u8]],
    ) -> Result<T> {
        let mut invocation = script.prepare_invoke();
        for key in keys {
            invocation.key(*key);
        }
        for arg in args {
            invocation.arg(*arg);
        }
        invocation.invoke_async(&mut self.conn).await
    }
}
