// ============================================================================
// Dead Letter Sink
// ============================================================================
//
// Terminal, append-only store for entries the pipeline gave up on. Records
// are never replayed automatically; operators inspect them and reprocess by
// hand. The original log entry is acknowledged right after the record is
// written, so one bad entry cannot stall its partition.
//
// Redis layout: stream DEAD_LETTER_STREAM, field `record` = JSON
// DeadLetterRecord, approximate MAXLEN.
//
// ============================================================================

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use courier_redis::RedisClient;
use courier_types::DeadLetterRecord;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn send_to_dead_letter(&self, record: &DeadLetterRecord) -> Result<()>;
}

#[derive(Clone)]
pub struct RedisDeadLetterSink {
    client: RedisClient,
    stream_key: String,
    max_len: usize,
}

impl RedisDeadLetterSink {
    pub fn new(client: RedisClient, stream_key: impl Into<String>, max_len: usize) -> Self {
        Self {
            client,
            stream_key: stream_key.into(),
            max_len,
        }
    }
}

#[async_trait]
impl DeadLetterSink for RedisDeadLetterSink {
    async fn send_to_dead_letter(&self, record: &DeadLetterRecord) -> Result<()> {
        let body = serde_json::to_vec(record).context("Failed to serialize dead-letter record")?;
        let mut client = self.client.clone();
        client
            .xadd_maxlen(&self.stream_key, self.max_len, &[("record", body.as_slice())])
            .await
            .context("Failed to append to dead-letter stream")?;
        Ok(())
    }
}

/// Collects records in memory; `fail_next` simulates an unavailable sink
#[derive(Default)]
pub struct InMemoryDeadLetterSink {
    records: Mutex<Vec<DeadLetterRecord>>,
    fail_next: AtomicU32,
}

impl InMemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DeadLetterRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn send_to_dead_letter(&self, record: &DeadLetterRecord) -> Result<()> {
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            bail!("injected dead-letter sink failure");
        }
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }
}
