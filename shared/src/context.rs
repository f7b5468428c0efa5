// ============================================================================
// Delivery Services - explicit wiring of the pipeline's collaborators
// ============================================================================
//
// Assembled once at process startup and passed by constructor to the
// producer, consumers and pipeline. Nothing is looked up globally.
//
// ============================================================================

use crate::dead_letter::{DeadLetterSink, InMemoryDeadLetterSink, RedisDeadLetterSink};
use crate::idempotency::{IdempotencyStore, InMemoryIdempotencyStore, RedisIdempotencyStore};
use crate::lease::{InMemoryLeaseManager, LeaseManager, RedisLeaseManager};
use crate::log::{InMemoryLog, PartitionedLog, RedisStreamLog};
use crate::presence::{InMemoryPresence, PresenceRegistry, RedisPresence};
use crate::push::{InMemoryPushQueue, PushQueue, RedisPushQueue};
use crate::store::{InMemoryMessageStore, MessageStore};
use courier_config::Config;
use courier_redis::RedisClient;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct DeliveryServices {
    pub log: Arc<dyn PartitionedLog>,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub store: Arc<dyn MessageStore>,
    pub presence: Arc<dyn PresenceRegistry>,
    pub push: Arc<dyn PushQueue>,
    pub dead_letter: Arc<dyn DeadLetterSink>,
    pub leases: Arc<dyn LeaseManager>,
}

impl DeliveryServices {
    /// Redis-backed collaborators sharing one connection; `store` is
    /// supplied by the caller (Postgres in production)
    pub fn redis(config: &Config, client: RedisClient, store: Arc<dyn MessageStore>) -> Self {
        let prefixes = &config.redis_key_prefixes;
        let channels = &config.redis_channels;
        Self {
            log: Arc::new(RedisStreamLog::new(
                client.clone(),
                config.stream.key_prefix.clone(),
                config.stream.max_len,
            )),
            idempotency: Arc::new(RedisIdempotencyStore::new(
                client.clone(),
                prefixes.idempotency.clone(),
                config.delivery.idempotency_ttl_secs,
            )),
            store,
            presence: Arc::new(RedisPresence::new(
                client.clone(),
                prefixes.presence.clone(),
                channels.delivery_message.clone(),
            )),
            push: Arc::new(RedisPushQueue::new(
                client.clone(),
                prefixes.push_dedup.clone(),
                channels.push_stream.clone(),
                config.delivery.push_dedup_ttl_secs,
                config.delivery.push_stream_max_len,
            )),
            dead_letter: Arc::new(RedisDeadLetterSink::new(
                client.clone(),
                config.delivery.dead_letter_stream.clone(),
                config.delivery.dead_letter_max_len,
            )),
            leases: Arc::new(RedisLeaseManager::new(
                client,
                prefixes.partition_lease.clone(),
                config.stream.consumer_group.clone(),
                config.stream.lease_ttl_ms,
            )),
        }
    }
}

/// In-memory collaborators with typed handles for inspection and fault
/// injection. Used by tests and local runs without Redis/Postgres.
#[derive(Clone)]
pub struct InMemoryServices {
    pub log: Arc<InMemoryLog>,
    pub idempotency: Arc<InMemoryIdempotencyStore>,
    pub store: Arc<InMemoryMessageStore>,
    pub presence: Arc<InMemoryPresence>,
    pub push: Arc<InMemoryPushQueue>,
    pub dead_letter: Arc<InMemoryDeadLetterSink>,
    pub leases: Arc<InMemoryLeaseManager>,
}

impl InMemoryServices {
    pub fn new() -> Self {
        Self::with_lease_ttl(Duration::from_secs(15))
    }

    pub fn with_lease_ttl(ttl: Duration) -> Self {
        Self {
            log: Arc::new(InMemoryLog::new()),
            idempotency: Arc::new(InMemoryIdempotencyStore::new()),
            store: Arc::new(InMemoryMessageStore::new()),
            presence: Arc::new(InMemoryPresence::new()),
            push: Arc::new(InMemoryPushQueue::new()),
            dead_letter: Arc::new(InMemoryDeadLetterSink::new()),
            leases: Arc::new(InMemoryLeaseManager::new(ttl)),
        }
    }

    pub fn services(&self) -> DeliveryServices {
        DeliveryServices {
            log: self.log.clone(),
            idempotency: self.idempotency.clone(),
            store: self.store.clone(),
            presence: self.presence.clone(),
            push: self.push.clone(),
            dead_letter: self.dead_letter.clone(),
            leases: self.leases.clone(),
        }
    }
}

impl Default for InMemoryServices {
    fn default() -> Self {
        Self::new()
    }
}
