// ============================================================================
// Partitioned Log
// ============================================================================
//
// Append-only, per-partition ordered log with consumer-group checkpoints and
// a claimable pending-entry list (PEL):
//
//   append       → new entry at the tail of one partition
//   read_new     → entries never delivered to the group (cursor advances)
//   claim_stale  → pending entries idle longer than a threshold move to the
//                  caller; this is how a crashed consumer's work is recovered
//   acknowledge  → removes entries from the PEL (the checkpoint)
//
// Entries carry raw bytes; decoding happens in the consumer so that an
// undecodable entry can still be dead-lettered with its original offset.
//
// ============================================================================

mod codec;
mod memory;
mod redis;

pub use codec::{decode_envelope, encode_envelope};
pub use memory::InMemoryLog;
pub use redis::RedisStreamLog;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;

/// Position of an entry within a partition: `<ms>-<seq>`, totally ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogOffset {
    pub ms: u64,
    pub seq: u64,
}

impl LogOffset {
    pub const ZERO: LogOffset = LogOffset { ms: 0, seq: 0 };

    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }
}

impl fmt::Display for LogOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for LogOffset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (ms, seq) = s
            .split_once('-')
            .ok_or_else(|| anyhow!("invalid log offset: {}", s))?;
        Ok(Self {
            ms: ms.parse().map_err(|_| anyhow!("invalid log offset: {}", s))?,
            seq: seq.parse().map_err(|_| anyhow!("invalid log offset: {}", s))?,
        })
    }
}

/// Entry as stored in the log, before decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub offset: LogOffset,
    /// How many times the group has handed this entry out (1 on first read)
    pub delivery_count: u64,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct ClaimBatch {
    pub entries: Vec<RawEntry>,
    /// Pending offsets whose data had been trimmed; the log drops them
    pub trimmed: usize,
}

#[async_trait]
pub trait PartitionedLog: Send + Sync {
    /// Append `payload` to `partition`, returning its offset
    async fn append(&self, partition: u32, message_id: &str, payload: Vec<u8>) -> Result<LogOffset>;

    /// Create the consumer group (from the start of the partition) if missing
    async fn ensure_group(&self, partition: u32, group: &str) -> Result<()>;

    /// Entries never delivered to `group`, oldest first.
    /// Waits up to `block_ms` when there are none.
    async fn read_new(
        &self,
        partition: u32,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<RawEntry>>;

    /// Move pending entries idle for at least `min_idle_ms` to `consumer`,
    /// oldest first
    async fn claim_stale(
        &self,
        partition: u32,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<ClaimBatch>;

    /// Acknowledge `offsets`; returns how many were pending
    async fn acknowledge(&self, partition: u32, group: &str, offsets: &[LogOffset]) -> Result<u64>;

    /// Delivered but unacknowledged entries
    async fn pending_count(&self, partition: u32, group: &str) -> Result<u64>;

    /// All unacknowledged entries: pending plus never delivered
    async fn lag(&self, partition: u32, group: &str) -> Result<u64>;
}
