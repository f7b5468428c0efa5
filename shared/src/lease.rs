// ============================================================================
// Partition Leases
// ============================================================================
//
// One active consumer per (group, partition): a worker reads a partition only
// while it holds the lease.
//
//   acquire → SET {prefix}{group}:{partition} <owner> NX PX ttl
//             (an owner re-acquiring its own unexpired lease succeeds)
//   renew   → PEXPIRE only if the value is still <owner>
//   release → DEL only if the value is still <owner>
//
// A worker whose renew fails must stop reading immediately: another worker
// may already own the partition.
//
// ============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use courier_redis::RedisClient;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[async_trait]
pub trait LeaseManager: Send + Sync {
    async fn acquire(&self, partition: u32, owner: &str) -> Result<bool>;

    async fn renew(&self, partition: u32, owner: &str) -> Result<bool>;

    async fn release(&self, partition: u32, owner: &str) -> Result<bool>;
}

const RENEW_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

#[derive(Clone)]
pub struct RedisLeaseManager {
    client: RedisClient,
    key_prefix: String,
    group: String,
    ttl_ms: u64,
    renew_script: redis::Script,
    release_script: redis::Script,
}

impl RedisLeaseManager {
    pub fn new(client: RedisClient, key_prefix: impl Into<String>, group: impl Into<String>, ttl_ms: u64) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
            group: group.into(),
            ttl_ms,
            renew_script: RedisClient::create_script(RENEW_SCRIPT),
            release_script: RedisClient::create_script(RELEASE_SCRIPT),
        }
    }

    fn key(&self, partition: u32) -> String {
        format!("{}{}:{}", self.key_prefix, self.group, partition)
    }
}

#[async_trait]
impl LeaseManager for RedisLeaseManager {
    async fn acquire(&self, partition: u32, owner: &str) -> Result<bool> {
        let key = self.key(partition);
        let mut client = self.client.clone();
        if client
            .set_nx_px(&key, owner, self.ttl_ms)
            .await
            .context("Failed to acquire partition lease")?
        {
            return Ok(true);
        }
        // Restarted with the same consumer name before the lease lapsed
        self.renew(partition, owner).await
    }

    async fn renew(&self, partition: u32, owner: &str) -> Result<bool> {
        let key = self.key(partition);
        let ttl = self.ttl_ms.to_string();
        let mut client = self.client.clone();
        let renewed: i64 = client
            .run_script(&self.renew_script, &[key.as_str()], &[owner.as_bytes(), ttl.as_bytes()])
            .await
            .context("Failed to renew partition lease")?;
        Ok(renewed == 1)
    }

    async fn release(&self, partition: u32, owner: &str) -> Result<bool> {
        let key = self.key(partition);
        let mut client = self.client.clone();
        let released: i64 = client
            .run_script(&self.release_script, &[key.as_str()], &[owner.as_bytes()])
            .await
            .context("Failed to release partition lease")?;
        Ok(released == 1)
    }
}

/// In-process leases with real expiry
pub struct InMemoryLeaseManager {
    ttl: Duration,
    leases: Mutex<HashMap<u32, (String, Instant)>>,
}

impl InMemoryLeaseManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            leases: Mutex::new(HashMap::new()),
        }
    }

    pub fn owner(&self, partition: u32) -> Option<String> {
        let leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        leases
            .get(&partition)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(owner, _)| owner.clone())
    }

    /// Drop the lease as if its TTL ran out
    pub fn expire(&self, partition: u32) {
        self.leases
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&partition);
    }
}

impl Default for InMemoryLeaseManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(15))
    }
}

#[async_trait]
impl LeaseManager for InMemoryLeaseManager {
    async fn acquire(&self, partition: u32, owner: &str) -> Result<bool> {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        match leases.get(&partition) {
            Some((holder, expires)) if *expires > now && holder != owner => Ok(false),
            _ => {
                leases.insert(partition, (owner.to_string(), now + self.ttl));
                Ok(true)
            }
        }
    }

    async fn renew(&self, partition: u32, owner: &str) -> Result<bool> {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        match leases.get_mut(&partition) {
            Some((holder, expires)) if holder == owner && *expires > now => {
                *expires = now + self.ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, partition: u32, owner: &str) -> Result<bool> {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        match leases.get(&partition) {
            Some((holder, _)) if holder == owner => {
                leases.remove(&partition);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
