use super::{ClaimBatch, LogOffset, PartitionedLog, RawEntry};
use crate::partition::stream_key;
use anyhow::{Context, Result};
use async_trait::async_trait;
use courier_redis::{RedisClient, StreamEntryBinary, StreamReadOptions};
use std::collections::HashMap;
use tracing::{debug, warn};

const FIELD_MESSAGE_ID: &str = "message_id";
const FIELD_PAYLOAD: &str = "payload";

/// Upper bound on XAUTOCLAIM round trips per `claim_stale` call
const MAX_CLAIM_SCANS: usize = 16;

/// Entries scanned when XINFO cannot report lag
const LAG_SCAN_LIMIT: usize = 100_000;

/// Redis Streams backed log: one stream per partition, `{prefix}:{partition}`.
///
/// Blocking reads hold the connection, so each partition worker should own
/// a `RedisStreamLog` over its own `RedisClient`.
#[derive(Clone)]
pub struct RedisStreamLog {
    client: RedisClient,
    key_prefix: String,
    max_len: usize,
}

impl RedisStreamLog {
    pub fn new(client: RedisClient, key_prefix: impl Into<String>, max_len: usize) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
            max_len,
        }
    }

    fn key(&self, partition: u32) -> String {
        stream_key(&self.key_prefix, partition)
    }

    fn to_raw(entry: StreamEntryBinary, delivery_count: u64) -> Result<RawEntry> {
        let offset: LogOffset = entry.id.parse()?;
        let payload = entry.fields.get(FIELD_PAYLOAD).cloned().unwrap_or_default();
        Ok(RawEntry {
            offset,
            delivery_count,
            payload,
        })
    }
}

#[async_trait]
impl PartitionedLog for RedisStreamLog {
    async fn append(&self, partition: u32, message_id: &str, payload: Vec<u8>) -> Result<LogOffset> {
        let key = self.key(partition);
        let mut client = self.client.clone();
        let id = client
            .xadd_maxlen(
                &key,
                self.max_len,
                &[
                    (FIELD_MESSAGE_ID, message_id.as_bytes()),
                    (FIELD_PAYLOAD, payload.as_slice()),
                ],
            )
            .await
            .with_context(|| format!("XADD to {} failed", key))?;
        id.parse()
    }

    async fn ensure_group(&self, partition: u32, group: &str) -> Result<()> {
        let key = self.key(partition);
        let mut client = self.client.clone();
        let created = client
            .xgroup_create_mkstream(&key, group)
            .await
            .with_context(|| format!("XGROUP CREATE on {} failed", key))?;
        if created {
            debug!(stream = %key, group = %group, "Created consumer group");
        }
        Ok(())
    }

    async fn read_new(
        &self,
        partition: u32,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<RawEntry>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let key = self.key(partition);
        let mut client = self.client.clone();
        let options = StreamReadOptions {
            block: (block_ms > 0).then_some(block_ms),
            count: Some(count as u64),
        };
        let entries = client
            .xreadgroup(&key, group, consumer, options)
            .await
            .with_context(|| format!("XREADGROUP on {} failed", key))?;

        entries
            .into_iter()
            .map(|entry| Self::to_raw(entry, 1))
            .collect()
    }

    async fn claim_stale(
        &self,
        partition: u32,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<ClaimBatch> {
        let key = self.key(partition);
        let mut client = self.client.clone();
        let mut batch = ClaimBatch::default();
        let mut claimed = Vec::new();
        let mut cursor = "0-0".to_string();

        for _ in 0..MAX_CLAIM_SCANS {
            let remaining = count.saturating_sub(claimed.len());
            if remaining == 0 {
                break;
            }
            let result = client
                .xautoclaim(&key, group, consumer, min_idle_ms, &cursor, remaining)
                .await
                .with_context(|| format!("XAUTOCLAIM on {} failed", key))?;
            batch.trimmed += result.deleted.len();
            claimed.extend(result.entries);
            cursor = result.next_start;
            if cursor == "0-0" {
                break;
            }
        }

        if claimed.is_empty() {
            return Ok(batch);
        }

        // XAUTOCLAIM does not report delivery counts; XPENDING does
        let first = claimed[0].id.clone();
        let last = claimed[claimed.len() - 1].id.clone();
        let counts: HashMap<String, u64> = client
            .xpending_range(&key, group, &first, &last, claimed.len(), Some(consumer))
            .await
            .with_context(|| format!("XPENDING on {} failed", key))?
            .into_iter()
            .map(|p| (p.id, p.delivery_count))
            .collect();

        for entry in claimed {
            let delivery_count = counts.get(&entry.id).copied().unwrap_or_else(|| {
                warn!(stream = %key, id = %entry.id, "Claimed entry missing from XPENDING");
                2
            });
            batch.entries.push(Self::to_raw(entry, delivery_count)?);
        }
        batch.entries.sort_by_key(|e| e.offset);
        Ok(batch)
    }

    async fn acknowledge(&self, partition: u32, group: &str, offsets: &[LogOffset]) -> Result<u64> {
        let key = self.key(partition);
        let ids: Vec<String> = offsets.iter().map(|o| o.to_string()).collect();
        let mut client = self.client.clone();
        let acked = client
            .xack(&key, group, &ids)
            .await
            .with_context(|| format!("XACK on {} failed", key))?;
        Ok(acked.max(0) as u64)
    }

    async fn pending_count(&self, partition: u32, group: &str) -> Result<u64> {
        let key = self.key(partition);
        let mut client = self.client.clone();
        if client.xlen(&key).await? == 0 {
            return Ok(0);
        }
        let info = client
            .xinfo_group(&key, group)
            .await
            .with_context(|| format!("XINFO GROUPS on {} failed", key))?;
        Ok(info.map(|g| g.pending).unwrap_or(0))
    }

    async fn lag(&self, partition: u32, group: &str) -> Result<u64> {
        let key = self.key(partition);
        let mut client = self.client.clone();
        let length = client.xlen(&key).await?;
        if length == 0 {
            return Ok(0);
        }
        let Some(info) = client
            .xinfo_group(&key, group)
            .await
            .with_context(|| format!("XINFO GROUPS on {} failed", key))?
        else {
            // No group yet: everything is undelivered
            return Ok(length as u64);
        };

        let undelivered = match info.lag {
            Some(lag) => lag,
            None => client
                .xcount_after(&key, &info.last_delivered_id, LAG_SCAN_LIMIT)
                .await? as u64,
        };
        Ok(info.pending + undelivered)
    }
}
