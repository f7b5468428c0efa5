// ============================================================================
// Stream Consumer
// ============================================================================
//
// dequeue(partition, batch, block) → [LogEntry]
//   1. claim pending entries idle longer than the reclaim threshold
//      (crash recovery), oldest first
//   2. top the batch up with never-delivered entries
//
// acknowledge(partition, offsets)
//   Commits only those offsets, and refuses to commit an offset while an
//   older offset handed out by this consumer is still outstanding. Acking N
//   therefore means every entry <= N was applied or dead-lettered.
//
// After a lease takeover or a processing failure the partition is put into
// recovery: the next dequeue claims every pending entry regardless of idle
// time, and reads nothing new until the backlog is drained, so ordering is
// kept across the handover.
//
// ============================================================================

use crate::log::{LogOffset, PartitionedLog, RawEntry, decode_envelope};
use anyhow::{Result, bail};
use courier_metrics::{PARTITION_LAG, PARTITION_PENDING, RECLAIMED_ENTRIES_TOTAL};
use courier_types::MessageEnvelope;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Decoded view of a log entry
#[derive(Debug, Clone, PartialEq)]
pub enum EntryPayload {
    Envelope(MessageEnvelope),
    /// Could not be decoded; kept raw for the dead-letter record
    Malformed { raw: Vec<u8>, error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub partition: u32,
    pub offset: LogOffset,
    pub delivery_count: u64,
    /// Taken over from another (or an earlier) consumer
    pub reclaimed: bool,
    pub payload: EntryPayload,
}

impl LogEntry {
    fn from_raw(partition: u32, raw: RawEntry, reclaimed: bool) -> Self {
        let payload = match decode_envelope(&raw.payload) {
            Ok(envelope) => EntryPayload::Envelope(envelope),
            Err(e) => EntryPayload::Malformed {
                raw: raw.payload,
                error: e.to_string(),
            },
        };
        Self {
            partition,
            offset: raw.offset,
            delivery_count: raw.delivery_count,
            reclaimed,
            payload,
        }
    }

    pub fn envelope(&self) -> Option<&MessageEnvelope> {
        match &self.payload {
            EntryPayload::Envelope(envelope) => Some(envelope),
            EntryPayload::Malformed { .. } => None,
        }
    }
}

pub struct StreamConsumer {
    log: Arc<dyn PartitionedLog>,
    group: String,
    consumer_name: String,
    reclaim_idle_ms: u64,
    outstanding: Mutex<HashMap<u32, BTreeSet<LogOffset>>>,
    recovering: Mutex<HashSet<u32>>,
}

impl StreamConsumer {
    pub fn new(
        log: Arc<dyn PartitionedLog>,
        group: impl Into<String>,
        consumer_name: impl Into<String>,
        reclaim_idle_ms: u64,
    ) -> Self {
        Self {
            log,
            group: group.into(),
            consumer_name: consumer_name.into(),
            reclaim_idle_ms,
            outstanding: Mutex::new(HashMap::new()),
            recovering: Mutex::new(HashSet::new()),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    pub fn log(&self) -> &Arc<dyn PartitionedLog> {
        &self.log
    }

    pub async fn ensure_group(&self, partition: u32) -> Result<()> {
        self.log.ensure_group(partition, &self.group).await
    }

    /// Claim the whole pending backlog of `partition` before reading new
    /// entries again
    pub fn begin_recovery(&self, partition: u32) {
        self.recovering
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(partition);
    }

    pub fn is_recovering(&self, partition: u32) -> bool {
        self.recovering
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&partition)
    }

    /// Forget outstanding entries (they stay pending in the log) and recover
    /// them on the next dequeue
    pub fn abandon(&self, partition: u32) {
        self.outstanding
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&partition);
        self.begin_recovery(partition);
    }

    /// Forget everything about `partition`, e.g. after losing its lease
    pub fn release_partition(&self, partition: u32) {
        self.outstanding
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&partition);
        self.recovering
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&partition);
    }

    pub fn outstanding(&self, partition: u32) -> Vec<LogOffset> {
        self.outstanding
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&partition)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn dequeue(&self, partition: u32, batch_size: usize, block_ms: u64) -> Result<Vec<LogEntry>> {
        if batch_size == 0 {
            return Ok(Vec::new());
        }

        let recovering = self.is_recovering(partition);
        let min_idle = if recovering { 0 } else { self.reclaim_idle_ms };

        let claimed = self
            .log
            .claim_stale(partition, &self.group, &self.consumer_name, min_idle, batch_size)
            .await?;
        if claimed.trimmed > 0 {
            warn!(
                partition = partition,
                trimmed = claimed.trimmed,
                "Pending entries were trimmed from the log before they could be reclaimed"
            );
        }

        let mut entries: Vec<LogEntry> = claimed
            .entries
            .into_iter()
            .map(|raw| LogEntry::from_raw(partition, raw, true))
            .collect();

        if !entries.is_empty() {
            RECLAIMED_ENTRIES_TOTAL.inc_by(entries.len() as u64);
            info!(
                partition = partition,
                count = entries.len(),
                recovering = recovering,
                "Reclaimed pending entries"
            );
        }

        if recovering {
            if !entries.is_empty() {
                self.track(partition, &entries);
                return Ok(entries);
            }
            debug!(partition = partition, "Pending backlog drained, resuming reads");
            self.recovering
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&partition);
        }

        let room = batch_size - entries.len();
        if room > 0 {
            // Don't sit in a blocking read with reclaimed work in hand
            let block = if entries.is_empty() { block_ms } else { 0 };
            let fresh = self
                .log
                .read_new(partition, &self.group, &self.consumer_name, room, block)
                .await?;
            entries.extend(
                fresh
                    .into_iter()
                    .map(|raw| LogEntry::from_raw(partition, raw, false)),
            );
        }

        self.track(partition, &entries);
        Ok(entries)
    }

    fn track(&self, partition: u32, entries: &[LogEntry]) {
        if entries.is_empty() {
            return;
        }
        let mut outstanding = self.outstanding.lock().unwrap_or_else(|e| e.into_inner());
        let set = outstanding.entry(partition).or_default();
        set.extend(entries.iter().map(|e| e.offset));
    }

    pub async fn acknowledge(&self, partition: u32, offsets: &[LogOffset]) -> Result<u64> {
        let Some(highest) = offsets.iter().max().copied() else {
            return Ok(0);
        };
        let acking: BTreeSet<LogOffset> = offsets.iter().copied().collect();

        {
            let outstanding = self.outstanding.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(set) = outstanding.get(&partition) {
                if let Some(blocking) = set
                    .range(..=highest)
                    .find(|offset| !acking.contains(offset))
                {
                    bail!(
                        "cannot acknowledge {} on partition {} while {} is outstanding",
                        highest,
                        partition,
                        blocking
                    );
                }
            }
        }

        let acked = self.log.acknowledge(partition, &self.group, offsets).await?;

        let mut outstanding = self.outstanding.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(set) = outstanding.get_mut(&partition) {
            for offset in &acking {
                set.remove(offset);
            }
        }
        Ok(acked)
    }

    /// Unacknowledged entries (pending + never delivered); also exported as
    /// a gauge
    pub async fn partition_lag(&self, partition: u32) -> Result<u64> {
        let lag = self.log.lag(partition, &self.group).await?;
        PARTITION_LAG
            .with_label_values(&[partition.to_string().as_str()])
            .set(lag as i64);
        Ok(lag)
    }

    /// Delivered but unacknowledged entries across all consumers of the group
    pub async fn pending(&self, partition: u32) -> Result<u64> {
        let pending = self.log.pending_count(partition, &self.group).await?;
        PARTITION_PENDING
            .with_label_values(&[partition.to_string().as_str()])
            .set(pending as i64);
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{InMemoryLog, encode_envelope};
    use chrono::Utc;
    use courier_types::{EnvelopeMetadata, Priority};

    fn envelope(content: &str) -> MessageEnvelope {
        MessageEnvelope {
            message_id: format!("m-{}", content),
            conversation_id: "conv_1".to_string(),
            sender_id: "alice".to_string(),
            created_at: Utc::now(),
            idempotency_key: format!("k-{}", content),
            correlation_id: "corr".to_string(),
            payload_key: None,
            metadata: EnvelopeMetadata {
                content: content.to_string(),
                content_type: "text/plain".to_string(),
                priority: Priority::Normal,
                retry_count: 0,
                recipient_ids: vec!["bob".to_string()],
            },
        }
    }

    async fn setup(contents: &[&str]) -> (Arc<InMemoryLog>, StreamConsumer) {
        let log = Arc::new(InMemoryLog::new());
        let consumer = StreamConsumer::new(log.clone(), "g", "c1", 60_000);
        consumer.ensure_group(0).await.unwrap();
        for content in contents {
            let env = envelope(content);
            log.append(0, &env.message_id, encode_envelope(&env).unwrap())
                .await
                .unwrap();
        }
        (log, consumer)
    }

    #[tokio::test]
    async fn test_out_of_order_ack_is_refused() {
        let (_log, consumer) = setup(&["a", "b", "c"]).await;
        let entries = consumer.dequeue(0, 10, 0).await.unwrap();
        assert_eq!(entries.len(), 3);

        let err = consumer.acknowledge(0, &[entries[1].offset]).await.unwrap_err();
        assert!(err.to_string().contains("outstanding"));

        // acking both together is fine
        assert_eq!(
            consumer
                .acknowledge(0, &[entries[0].offset, entries[1].offset])
                .await
                .unwrap(),
            2
        );
        assert_eq!(consumer.outstanding(0), vec![entries[2].offset]);
    }

    #[tokio::test]
    async fn test_malformed_entry_is_surfaced_not_dropped() {
        let (log, consumer) = setup(&[]).await;
        log.append(0, "junk", vec![0xc1, 0xff, 0x00]).await.unwrap();

        let entries = consumer.dequeue(0, 10, 0).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(matches!(entries[0].payload, EntryPayload::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_recovery_claims_backlog_before_new_reads() {
        let (log, consumer) = setup(&["a", "b"]).await;
        let first = consumer.dequeue(0, 1, 0).await.unwrap();
        assert_eq!(first[0].envelope().unwrap().metadata.content, "a");

        consumer.abandon(0);
        assert!(consumer.is_recovering(0));

        // "a" comes back before "b", despite not being idle long enough
        let again = consumer.dequeue(0, 10, 0).await.unwrap();
        assert_eq!(again.len(), 1);
        assert!(again[0].reclaimed);
        assert_eq!(again[0].offset, first[0].offset);
        assert_eq!(again[0].delivery_count, 2);

        consumer.acknowledge(0, &[again[0].offset]).await.unwrap();
        let next = consumer.dequeue(0, 10, 0).await.unwrap();
        assert!(!consumer.is_recovering(0));
        assert_eq!(next[0].envelope().unwrap().metadata.content, "b");
        assert_eq!(log.len(0), 2);
    }

    #[tokio::test]
    async fn test_lag_counts_undelivered_and_pending() {
        let (_log, consumer) = setup(&["a", "b", "c"]).await;
        assert_eq!(consumer.partition_lag(0).await.unwrap(), 3);

        let entries = consumer.dequeue(0, 2, 0).await.unwrap();
        assert_eq!(consumer.partition_lag(0).await.unwrap(), 3);
        assert_eq!(consumer.pending(0).await.unwrap(), 2);

        consumer
            .acknowledge(0, &[entries[0].offset, entries[1].offset])
            .await
            .unwrap();
        assert_eq!(consumer.partition_lag(0).await.unwrap(), 1);
    }
}
