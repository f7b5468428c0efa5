//! Push notification queue
//!
//! Jobs are keyed by (message_id, recipient_id): enqueueing the same pair
//! twice collapses into one job. A push delivery service drains the queue,
//! resolves device tokens and calls the external gateway.

mod memory;
mod redis;

pub use memory::InMemoryPushQueue;
pub use redis::RedisPushQueue;

use anyhow::Result;
use async_trait::async_trait;
use courier_types::PushJob;

#[async_trait]
pub trait PushQueue: Send + Sync {
    /// `Ok(false)` when a job for the same (message, recipient) already exists
    async fn enqueue_push(&self, job: &PushJob) -> Result<bool>;
}
