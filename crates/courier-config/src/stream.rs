// ============================================================================
// Partitioned Log / Consumer Configuration
// ============================================================================

use crate::constants::*;
use crate::env::EnvSource;
use anyhow::Result;

/// Settings for the partitioned log and the per-partition consume loops
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Number of partitions. Fixed for the lifetime of a deployment.
    pub partition_count: u32,
    /// Consumer group owning the checkpoints
    pub consumer_group: String,
    /// Name of this consumer inside the group (unique per process)
    pub consumer_name: String,
    /// Stream key prefix; partition N lives at "{prefix}:{N}"
    pub key_prefix: String,
    /// Approximate MAXLEN applied on append
    pub max_len: usize,
    /// Maximum entries per read
    pub batch_size: usize,
    /// How long a read blocks waiting for new entries
    pub block_ms: u64,
    /// Pending entries idle longer than this are reclaimed from crashed consumers
    pub reclaim_idle_ms: u64,
    /// Upper bound on delivered-but-unacknowledged entries per partition
    pub max_in_flight: usize,
    /// Sleep applied when the in-flight bound is reached
    pub backpressure_pause_ms: u64,
    /// Partition lease TTL
    pub lease_ttl_ms: u64,
    /// How often a standby worker retries acquiring a partition
    pub lease_retry_ms: u64,
}

impl StreamConfig {
    pub(crate) fn from_source(env: &EnvSource<'_>) -> Result<Self> {
        let config = Self {
            partition_count: env.parse_or("PARTITION_COUNT", DEFAULT_PARTITION_COUNT),
            consumer_group: env.string("CONSUMER_GROUP", DEFAULT_CONSUMER_GROUP),
            consumer_name: env
                .get("CONSUMER_NAME")
                .unwrap_or_else(|| format!("consumer-{}", uuid::Uuid::new_v4().simple())),
            key_prefix: env.string("STREAM_KEY_PREFIX", DEFAULT_STREAM_KEY_PREFIX),
            max_len: env.parse_or("STREAM_MAX_LEN", DEFAULT_STREAM_MAX_LEN),
            batch_size: env.parse_or("BATCH_SIZE", DEFAULT_BATCH_SIZE),
            block_ms: env.parse_or("BLOCK_MS", DEFAULT_BLOCK_MS),
            reclaim_idle_ms: env.parse_or("RECLAIM_IDLE_MS", DEFAULT_RECLAIM_IDLE_MS),
            max_in_flight: env.parse_or("MAX_IN_FLIGHT", DEFAULT_MAX_IN_FLIGHT),
            backpressure_pause_ms: env
                .parse_or("BACKPRESSURE_PAUSE_MS", DEFAULT_BACKPRESSURE_PAUSE_MS),
            lease_ttl_ms: env.parse_or("PARTITION_LEASE_TTL_MS", DEFAULT_PARTITION_LEASE_TTL_MS),
            lease_retry_ms: env
                .parse_or("PARTITION_LEASE_RETRY_MS", DEFAULT_PARTITION_LEASE_RETRY_MS),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.partition_count == 0 {
            anyhow::bail!("PARTITION_COUNT must be greater than zero");
        }
        if self.batch_size == 0 {
            anyhow::bail!("BATCH_SIZE must be greater than zero");
        }
        if self.max_in_flight < self.batch_size {
            anyhow::bail!("MAX_IN_FLIGHT must be at least BATCH_SIZE");
        }
        Ok(())
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            partition_count: DEFAULT_PARTITION_COUNT,
            consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
            consumer_name: "consumer-local".to_string(),
            key_prefix: DEFAULT_STREAM_KEY_PREFIX.to_string(),
            max_len: DEFAULT_STREAM_MAX_LEN,
            batch_size: DEFAULT_BATCH_SIZE,
            block_ms: DEFAULT_BLOCK_MS,
            reclaim_idle_ms: DEFAULT_RECLAIM_IDLE_MS,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            backpressure_pause_ms: DEFAULT_BACKPRESSURE_PAUSE_MS,
            lease_ttl_ms: DEFAULT_PARTITION_LEASE_TTL_MS,
            lease_retry_ms: DEFAULT_PARTITION_LEASE_RETRY_MS,
        }
    }
}
