use super::PushQueue;
use anyhow::{Context, Result};
use async_trait::async_trait;
use courier_redis::RedisClient;
use courier_types::PushJob;

/// Dedup marker and job append in one round trip. If the XADD fails the
/// marker is removed again, so a retry is not mistaken for a duplicate.
///
/// KEYS[1] dedup key, KEYS[2] push stream
/// ARGV[1] dedup ttl (secs), ARGV[2] job json, ARGV[3] stream max len
const ENQUEUE_SCRIPT: &str = r#"
if not redis.call('SET', KEYS[1], '1', 'NX', 'EX', ARGV[1]) then
    return 0
end
local added = redis.pcall('XADD', KEYS[2], 'MAXLEN', '~', ARGV[3], '*', 'job', ARGV[2])
if type(added) == 'table' and added.err then
    redis.call('DEL', KEYS[1])
    return added
end
return 1
"#;

/// Push queue on a Redis Stream with a `push_dedup:{message}:{recipient}` guard
#[derive(Clone)]
pub struct RedisPushQueue {
    client: RedisClient,
    script: redis::Script,
    dedup_prefix: String,
    stream_key: String,
    dedup_ttl_secs: u64,
    max_len: usize,
}

impl RedisPushQueue {
    pub fn new(
        client: RedisClient,
        dedup_prefix: impl Into<String>,
        stream_key: impl Into<String>,
        dedup_ttl_secs: u64,
        max_len: usize,
    ) -> Self {
        Self {
            client,
            script: RedisClient::create_script(ENQUEUE_SCRIPT),
            dedup_prefix: dedup_prefix.into(),
            stream_key: stream_key.into(),
            dedup_ttl_secs,
            max_len,
        }
    }

    fn dedup_key(&self, job: &PushJob) -> String {
        format!("{}{}:{}", self.dedup_prefix, job.message_id, job.recipient_id)
    }
}

#[async_trait]
impl PushQueue for RedisPushQueue {
    async fn enqueue_push(&self, job: &PushJob) -> Result<bool> {
        let dedup_key = self.dedup_key(job);
        let body = serde_json::to_string(job)?;
        let ttl = self.dedup_ttl_secs.to_string();
        let max_len = self.max_len.to_string();

        let mut client = self.client.clone();
        let created: i64 = client
            .run_script(
                &self.script,
                &[dedup_key.as_str(), self.stream_key.as_str()],
                &[ttl.as_bytes(), body.as_bytes(), max_len.as_bytes()],
            )
            .await
            .context("Failed to enqueue push job")?;
        Ok(created == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use courier_types::Priority;
    use serial_test::serial;

    #[tokio::test]
    #[ignore] // Requires Redis
    #[serial]
    async fn test_duplicate_enqueue_collapses() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let mut client = RedisClient::connect(&url).await.unwrap();
        client.del("courier_test:push_dedup:m1:bob").await.unwrap();
        let queue = RedisPushQueue::new(client, "courier_test:push_dedup:", "courier_test:push", 60, 100);

        let job = PushJob {
            message_id: "m1".to_string(),
            recipient_id: "bob".to_string(),
            conversation_id: "conv_1".to_string(),
            sender_id: "alice".to_string(),
            priority: Priority::Normal,
            preview: "hi".to_string(),
            enqueued_at: Utc::now(),
        };
        assert!(queue.enqueue_push(&job).await.unwrap());
        assert!(!queue.enqueue_push(&job).await.unwrap());
    }
}
