use super::{ClaimBatch, LogOffset, PartitionedLog, RawEntry};
use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

#[derive(Debug, Clone)]
struct PendingState {
    consumer: String,
    delivered_at: Instant,
    delivery_count: u64,
}

#[derive(Debug, Default)]
struct GroupState {
    /// Index into the partition's entries of the next never-delivered entry
    next_index: usize,
    pending: BTreeMap<LogOffset, PendingState>,
}

#[derive(Debug, Default)]
struct PartitionState {
    entries: Vec<(LogOffset, String, Vec<u8>)>,
    groups: HashMap<String, GroupState>,
    last_ms: u64,
    last_seq: u64,
}

impl PartitionState {
    fn next_offset(&mut self) -> LogOffset {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        if now > self.last_ms {
            self.last_ms = now;
            self.last_seq = 0;
        } else {
            self.last_seq += 1;
        }
        LogOffset::new(self.last_ms, self.last_seq)
    }

    fn payload(&self, offset: &LogOffset) -> Option<&Vec<u8>> {
        self.entries
            .binary_search_by_key(offset, |(o, _, _)| *o)
            .ok()
            .map(|i| &self.entries[i].2)
    }
}

/// In-process log with consumer-group semantics matching Redis Streams.
///
/// Fault hooks make the next N calls of an operation fail, and
/// [`InMemoryLog::age_pending`] fakes idle time for reclaim tests.
#[derive(Default)]
pub struct InMemoryLog {
    partitions: Mutex<HashMap<u32, PartitionState>>,
    appended: Notify,
    fail_appends: AtomicU32,
    fail_reads: AtomicU32,
    fail_acks: AtomicU32,
}

fn take_fault(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_appends(&self, n: u32) {
        self.fail_appends.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_reads(&self, n: u32) {
        self.fail_reads.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_acks(&self, n: u32) {
        self.fail_acks.store(n, Ordering::SeqCst);
    }

    /// Number of entries ever appended to `partition`
    pub fn len(&self, partition: u32) -> usize {
        let partitions = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
        partitions.get(&partition).map(|p| p.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, partition: u32) -> bool {
        self.len(partition) == 0
    }

    /// Message ids appended to `partition`, in log order
    pub fn message_ids(&self, partition: u32) -> Vec<String> {
        let partitions = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
        partitions
            .get(&partition)
            .map(|p| p.entries.iter().map(|(_, id, _)| id.clone()).collect())
            .unwrap_or_default()
    }

    /// Consumers currently holding pending entries of `partition`
    pub fn pending_owners(&self, partition: u32, group: &str) -> Vec<(LogOffset, String)> {
        let partitions = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
        partitions
            .get(&partition)
            .and_then(|p| p.groups.get(group))
            .map(|g| {
                g.pending
                    .iter()
                    .map(|(o, s)| (*o, s.consumer.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Pretend every pending entry of `partition` has been idle `by` longer
    pub fn age_pending(&self, partition: u32, by: Duration) {
        let mut partitions = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = partitions.get_mut(&partition) {
            for group in state.groups.values_mut() {
                for pending in group.pending.values_mut() {
                    if let Some(earlier) = pending.delivered_at.checked_sub(by) {
                        pending.delivered_at = earlier;
                    }
                }
            }
        }
    }

    fn take_new(
        &self,
        partition: u32,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<RawEntry>> {
        let mut partitions = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
        let state = partitions.entry(partition).or_default();
        let Some(group_state) = state.groups.get_mut(group) else {
            bail!("NOGROUP no such consumer group '{}' for partition {}", group, partition);
        };

        let start = group_state.next_index;
        let end = (start + count).min(state.entries.len());
        let now = Instant::now();
        let mut out = Vec::with_capacity(end - start);
        for (offset, _, payload) in &state.entries[start..end] {
            group_state.pending.insert(
                *offset,
                PendingState {
                    consumer: consumer.to_string(),
                    delivered_at: now,
                    delivery_count: 1,
                },
            );
            out.push(RawEntry {
                offset: *offset,
                delivery_count: 1,
                payload: payload.clone(),
            });
        }
        group_state.next_index = end;
        Ok(out)
    }
}

#[async_trait]
impl PartitionedLog for InMemoryLog {
    async fn append(&self, partition: u32, message_id: &str, payload: Vec<u8>) -> Result<LogOffset> {
        if take_fault(&self.fail_appends) {
            bail!("injected append failure on partition {}", partition);
        }
        let offset = {
            let mut partitions = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
            let state = partitions.entry(partition).or_default();
            let offset = state.next_offset();
            state.entries.push((offset, message_id.to_string(), payload));
            offset
        };
        self.appended.notify_waiters();
        Ok(offset)
    }

    async fn ensure_group(&self, partition: u32, group: &str) -> Result<()> {
        let mut partitions = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
        partitions
            .entry(partition)
            .or_default()
            .groups
            .entry(group.to_string())
            .or_default();
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
        if take_fault(&self.fail_reads) {
            bail!("injected read failure on partition {}", partition);
        }
        if count == 0 {
            return Ok(Vec::new());
        }

        let notified = self.appended.notified();
        let entries = self.take_new(partition, group, consumer, count)?;
        if !entries.is_empty() || block_ms == 0 {
            return Ok(entries);
        }

        let _ = tokio::time::timeout(Duration::from_millis(block_ms), notified).await;
        self.take_new(partition, group, consumer, count)
    }

    async fn claim_stale(
        &self,
        partition: u32,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<ClaimBatch> {
        if take_fault(&self.fail_reads) {
            bail!("injected claim failure on partition {}", partition);
        }
        let mut partitions = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
        let state = partitions.entry(partition).or_default();
        let Some(group_state) = state.groups.get(group) else {
            bail!("NOGROUP no such consumer group '{}' for partition {}", group, partition);
        };

        let min_idle = Duration::from_millis(min_idle_ms);
        let now = Instant::now();
        let stale: Vec<LogOffset> = group_state
            .pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.delivered_at) >= min_idle)
            .map(|(o, _)| *o)
            .take(count)
            .collect();

        let mut batch = ClaimBatch::default();
        let mut claimed = Vec::with_capacity(stale.len());
        for offset in stale {
            match state.payload(&offset).cloned() {
                Some(payload) => claimed.push((offset, payload)),
                None => batch.trimmed += 1,
            }
        }

        let Some(group_state) = state.groups.get_mut(group) else {
            return Ok(batch);
        };
        for (offset, payload) in claimed {
            if let Some(pending) = group_state.pending.get_mut(&offset) {
                pending.consumer = consumer.to_string();
                pending.delivered_at = now;
                pending.delivery_count += 1;
                batch.entries.push(RawEntry {
                    offset,
                    delivery_count: pending.delivery_count,
                    payload,
                });
            }
        }
        Ok(batch)
    }

    async fn acknowledge(&self, partition: u32, group: &str, offsets: &[LogOffset]) -> Result<u64> {
        if take_fault(&self.fail_acks) {
            bail!("injected ack failure on partition {}", partition);
        }
        let mut partitions = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
        let Some(group_state) = partitions
            .get_mut(&partition)
            .and_then(|p| p.groups.get_mut(group))
        else {
            return Ok(0);
        };
        Ok(offsets
            .iter()
            .filter(|o| group_state.pending.remove(o).is_some())
            .count() as u64)
    }

    async fn pending_count(&self, partition: u32, group: &str) -> Result<u64> {
        let partitions = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(partitions
            .get(&partition)
            .and_then(|p| p.groups.get(group))
            .map(|g| g.pending.len() as u64)
            .unwrap_or(0))
    }

    async fn lag(&self, partition: u32, group: &str) -> Result<u64> {
        let partitions = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
        let Some(state) = partitions.get(&partition) else {
            return Ok(0);
        };
        Ok(match state.groups.get(group) {
            Some(g) => (g.pending.len() + state.entries.len() - g.next_index) as u64,
            None => state.entries.len() as u64,
        })
    }
}
