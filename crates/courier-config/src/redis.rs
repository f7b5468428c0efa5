// ============================================================================
// Redis Configuration
// ============================================================================

use crate::env::EnvSource;

/// Redis key prefixes configuration
#[derive(Clone, Debug)]
pub struct RedisKeyPrefixes {
    /// Ingress idempotency records: "idempotency:{idempotency_key}"
    pub idempotency: String,
    /// Presence sets of live socket refs: "presence:{user_id}"
    pub presence: String,
    /// Push deduplication markers: "push_dedup:{message_id}:{recipient_id}"
    pub push_dedup: String,
    /// Partition ownership leases: "partition_lease:{group}:{partition}"
    pub partition_lease: String,
}

impl RedisKeyPrefixes {
    pub(crate) fn from_source(env: &EnvSource<'_>) -> Self {
        Self {
            idempotency: env.string("REDIS_KEY_PREFIX_IDEMPOTENCY", "idempotency:"),
            presence: env.string("REDIS_KEY_PREFIX_PRESENCE", "presence:"),
            push_dedup: env.string("REDIS_KEY_PREFIX_PUSH_DEDUP", "push_dedup:"),
            partition_lease: env.string("REDIS_KEY_PREFIX_PARTITION_LEASE", "partition_lease:"),
        }
    }
}

/// Redis channel and stream names
#[derive(Clone, Debug)]
pub struct RedisChannels {
    /// Socket emission channel template: "delivery_message:{server_instance_id}"
    pub delivery_message: String,
    /// Stream consumed by the push delivery service
    pub push_stream: String,
}

impl RedisChannels {
    pub(crate) fn from_source(env: &EnvSource<'_>) -> Self {
        Self {
            delivery_message: env.string("REDIS_CHANNEL_DELIVERY_MESSAGE", "delivery_message:"),
            push_stream: env.string("PUSH_STREAM", "courier:push_jobs"),
        }
    }
}
