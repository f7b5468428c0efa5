// ============================================================================
// Delivery Policy Configuration (retries, dead letters, dedup TTLs)
// ============================================================================

use crate::constants::*;
use crate::env::EnvSource;

#[derive(Clone, Debug)]
pub struct DeliveryPolicy {
    /// In-process attempts per entry before it is dead-lettered
    pub max_retries: u32,
    /// First backoff delay; doubles per attempt
    pub retry_base_delay_ms: u64,
    /// Backoff ceiling
    pub retry_max_delay_ms: u64,
    /// Entries delivered more often than this (across consumers) are dead-lettered
    pub max_deliveries: u32,
    /// Dead-letter stream key
    pub dead_letter_stream: String,
    /// Approximate MAXLEN of the dead-letter stream
    pub dead_letter_max_len: usize,
    /// Approximate MAXLEN of the push job stream
    pub push_stream_max_len: usize,
    /// Lifetime of ingress idempotency records
    pub idempotency_ttl_secs: u64,
    /// Lifetime of push deduplication markers
    pub push_dedup_ttl_secs: u64,
}

impl DeliveryPolicy {
    pub(crate) fn from_source(env: &EnvSource<'_>) -> Self {
        Self {
            max_retries: env.parse_or("MAX_RETRIES", DEFAULT_MAX_RETRIES).max(1),
            retry_base_delay_ms: env.parse_or("RETRY_BASE_DELAY_MS", DEFAULT_RETRY_BASE_DELAY_MS),
            retry_max_delay_ms: env.parse_or("RETRY_MAX_DELAY_MS", DEFAULT_RETRY_MAX_DELAY_MS),
            max_deliveries: env.parse_or("MAX_DELIVERIES", DEFAULT_MAX_DELIVERIES),
            dead_letter_stream: env.string("DEAD_LETTER_STREAM", DEFAULT_DEAD_LETTER_STREAM),
            dead_letter_max_len: env.parse_or("DEAD_LETTER_MAX_LEN", DEFAULT_DEAD_LETTER_MAX_LEN),
            push_stream_max_len: env.parse_or("PUSH_STREAM_MAX_LEN", DEFAULT_PUSH_STREAM_MAX_LEN),
            idempotency_ttl_secs: env.parse_or("IDEMPOTENCY_TTL_SECS", DEFAULT_IDEMPOTENCY_TTL_SECS),
            push_dedup_ttl_secs: env.parse_or("PUSH_DEDUP_TTL_SECS", DEFAULT_PUSH_DEDUP_TTL_SECS),
        }
    }
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            max_deliveries: DEFAULT_MAX_DELIVERIES,
            dead_letter_stream: DEFAULT_DEAD_LETTER_STREAM.to_string(),
            dead_letter_max_len: DEFAULT_DEAD_LETTER_MAX_LEN,
            push_stream_max_len: DEFAULT_PUSH_STREAM_MAX_LEN,
            idempotency_ttl_secs: DEFAULT_IDEMPOTENCY_TTL_SECS,
            push_dedup_ttl_secs: DEFAULT_PUSH_DEDUP_TTL_SECS,
        }
    }
}
