// ============================================================================
// Configuration Constants
// ============================================================================

// Default port values
pub(crate) const DEFAULT_PORT: u16 = 8080;
pub(crate) const DEFAULT_HEALTH_PORT: u16 = 8081;

// Partitioned log defaults
// Changing PARTITION_COUNT on a live deployment remaps conversations to other
// partitions; it requires an offline migration of the streams.
pub(crate) const DEFAULT_PARTITION_COUNT: u32 = 16;
pub(crate) const DEFAULT_CONSUMER_GROUP: &str = "courier-delivery";
pub(crate) const DEFAULT_STREAM_KEY_PREFIX: &str = "courier:messages";
pub(crate) const DEFAULT_STREAM_MAX_LEN: usize = 1_000_000;
pub(crate) const DEFAULT_BATCH_SIZE: usize = 64;
pub(crate) const DEFAULT_BLOCK_MS: u64 = 2_000;
pub(crate) const DEFAULT_RECLAIM_IDLE_MS: u64 = 30_000;
pub(crate) const DEFAULT_MAX_IN_FLIGHT: usize = 256;
pub(crate) const DEFAULT_BACKPRESSURE_PAUSE_MS: u64 = 250;

// Retry / dead-letter defaults
pub(crate) const DEFAULT_MAX_RETRIES: u32 = 5;
pub(crate) const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 100;
pub(crate) const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5_000;
pub(crate) const DEFAULT_MAX_DELIVERIES: u32 = 10;
pub(crate) const DEFAULT_DEAD_LETTER_STREAM: &str = "courier:dead_letter";
pub(crate) const DEFAULT_DEAD_LETTER_MAX_LEN: usize = 100_000;
pub(crate) const DEFAULT_PUSH_STREAM_MAX_LEN: usize = 100_000;

// Partition ownership
pub(crate) const DEFAULT_PARTITION_LEASE_TTL_MS: u64 = 15_000;
pub(crate) const DEFAULT_PARTITION_LEASE_RETRY_MS: u64 = 2_000;

// Time conversion constants
pub const SECONDS_PER_MINUTE: i64 = 60;
pub const SECONDS_PER_HOUR: i64 = 3600;
pub const SECONDS_PER_DAY: i64 = 86400;

// Idempotency TTLs
pub(crate) const DEFAULT_IDEMPOTENCY_TTL_SECS: u64 = (7 * SECONDS_PER_DAY) as u64;
pub(crate) const DEFAULT_PUSH_DEDUP_TTL_SECS: u64 = SECONDS_PER_DAY as u64;

// Ingress limits (in bytes / entries)
pub const MAX_CONTENT_BYTES: usize = 64 * 1024; // 64 KB
pub const MAX_RECIPIENTS: usize = 1024;
