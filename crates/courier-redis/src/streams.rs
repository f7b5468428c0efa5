//! Redis Streams support with consumer groups
//!
//! Replies of XAUTOCLAIM, XPENDING and XINFO are parsed by hand from
//! `redis::Value` so both RESP2 and RESP3 servers work.

use crate::{RedisClient, Result};
use redis::{ErrorKind, RedisError, Value, streams::StreamReadReply};
use std::collections::HashMap;

/// Entry in a Redis Stream (binary values)
/// Used for MessagePack and other binary serialization formats
#[derive(Debug, Clone)]
pub struct StreamEntryBinary {
    pub id: String,
    pub fields: HashMap<String, Vec<u8>>,
}

/// Options for XREADGROUP
#[derive(Debug, Clone, Default)]
pub struct StreamReadOptions {
    /// Block for N milliseconds (None = no blocking)
    pub block: Option<u64>,
    /// Maximum number of entries to return
    pub count: Option<u64>,
}

/// Result of XAUTOCLAIM
#[derive(Debug, Clone, Default)]
pub struct ClaimedEntries {
    /// Cursor for the next XAUTOCLAIM call ("0-0" when the scan completed)
    pub next_start: String,
    pub entries: Vec<StreamEntryBinary>,
    /// Pending IDs whose data was already trimmed from the stream
    pub deleted: Vec<String>,
}

/// One row of the extended XPENDING form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: String,
    pub consumer: String,
    pub idle_ms: u64,
    pub delivery_count: u64,
}

/// Subset of XINFO GROUPS for one group
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupInfo {
    pub name: String,
    pub pending: u64,
    pub last_delivered_id: String,
    /// Entries not yet delivered to the group; `None` when Redis cannot tell
    pub lag: Option<u64>,
}

fn protocol_error(detail: &str) -> RedisError {
    RedisError::from((ErrorKind::TypeError, "Unexpected stream reply", detail.to_string()))
}

fn value_to_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::BulkString(bytes) => Some(bytes.clone()),
        Value::SimpleString(s) => Some(s.as_bytes().to_vec()),
        Value::Int(i) => Some(i.to_string().into_bytes()),
        _ => None,
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    value_to_bytes(value).map(|b| String::from_utf8_lossy(&b).into_owned())
}

fn value_to_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Int(i) => u64::try_from(*i).ok(),
        other => value_to_string(other).and_then(|s| s.parse().ok()),
    }
}

/// Parse `[id, [field, value, ...]]`
fn parse_entry(value: &Value) -> Option<StreamEntryBinary> {
    let Value::Array(parts) = value else {
        return None;
    };
    let id = value_to_string(parts.first()?)?;
    let mut fields = HashMap::new();
    if let Some(Value::Array(kv)) = parts.get(1) {
        for pair in kv.chunks(2) {
            if let [k, v] = pair {
                if let (Some(k), Some(v)) = (value_to_string(k), value_to_bytes(v)) {
                    fields.insert(k, v);
                }
            }
        }
    }
    Some(StreamEntryBinary { id, fields })
}

/// Flatten RESP2 `[k, v, k, v]` or RESP3 map replies into pairs
fn key_value_pairs(value: &Value) -> Vec<(String, &Value)> {
    match value {
        Value::Array(items) => items
            .chunks(2)
            .filter_map(|pair| match pair {
                [k, v] => value_to_string(k).map(|k| (k, v)),
                _ => None,
            })
            .collect(),
        Value::Map(items) => items
            .iter()
            .filter_map(|(k, v)| value_to_string(k).map(|k| (k, v)))
            .collect(),
        _ => Vec::new(),
    }
}

impl RedisClient {
    // ============================================================================
    // Stream Operations
    // ============================================================================

    /// XADD key MAXLEN ~ max_len * field value [field value ...]
    ///
    /// Returns the generated ID
    pub async fn xadd_maxlen(
        &mut self,
        stream_key: &str,
        max_len: usize,
        fields: &[(&str, &[u8])],
    ) -> Result<String> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream_key)
            .arg("MAXLEN")
            .arg("~") // Approximate trimming
            .arg(max_len as i64)
            .arg("*");
        for (field, value) in fields {
            cmd.arg(*field).arg(*value);
        }
        cmd.query_async(self.connection_mut()).await
    }

    /// XGROUP CREATE key group 0 MKSTREAM
    ///
    /// Returns `false` if the group already existed.
    pub async fn xgroup_create_mkstream(&mut self, stream_key: &str, group: &str) -> Result<bool> {
        let result: Result<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream_key)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(self.connection_mut())
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// XREADGROUP GROUP group consumer [COUNT n] [BLOCK ms] STREAMS key >
    ///
    /// Only never-delivered entries are returned; an empty vec means the
    /// block timeout expired.
    pub async fn xreadgroup(
        &mut self,
        stream_key: &str,
        group: &str,
        consumer: &str,
        options: StreamReadOptions,
    ) -> Result<Vec<StreamEntryBinary>> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(group).arg(consumer);

        if let Some(count) = options.count {
            cmd.arg("COUNT").arg(count);
        }
        if let Some(block_ms) = options.block {
            cmd.arg("BLOCK").arg(block_ms);
        }
        cmd.arg("STREAMS").arg(stream_key).arg(">");

        let reply: Option<StreamReadReply> = cmd.query_async(self.connection_mut()).await?;

        let mut entries = Vec::new();
        for stream in reply.map(|r| r.keys).unwrap_or_default() {
            for stream_id in stream.ids {
                let mut fields = HashMap::new();
                for (key, value) in stream_id.map.iter() {
                    if let Some(bytes) = value_to_bytes(value) {
                        fields.insert(key.clone(), bytes);
                    }
                }
                entries.push(StreamEntryBinary {
                    id: stream_id.id,
                    fields,
                });
            }
        }

        Ok(entries)
    }

    /// XAUTOCLAIM key group consumer min_idle start COUNT n
    pub async fn xautoclaim(
        &mut self,
        stream_key: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        start: &str,
        count: usize,
    ) -> Result<ClaimedEntries> {
        let reply: Value = redis::cmd("XAUTOCLAIM")
            .arg(stream_key)
            .arg(group)
            .arg(consumer)
            .arg(min_idle_ms)
            .arg(start)
            .arg("COUNT")
            .arg(count)
            .query_async(self.connection_mut())
            .await?;

        let Value::Array(parts) = reply else {
            return Err(protocol_error("XAUTOCLAIM reply is not an array"));
        };

        let next_start = parts
            .first()
            .and_then(value_to_string)
            .ok_or_else(|| protocol_error("XAUTOCLAIM reply has no cursor"))?;

        let mut claimed = ClaimedEntries {
            next_start,
            ..Default::default()
        };

        if let Some(Value::Array(raw_entries)) = parts.get(1) {
            for raw in raw_entries {
                match parse_entry(raw) {
                    // Redis 6.2 reports trimmed entries as [id, nil]
                    Some(entry) if entry.fields.is_empty() => claimed.deleted.push(entry.id),
                    Some(entry) => claimed.entries.push(entry),
                    None => {}
                }
            }
        }

        // Redis 7 lists trimmed IDs separately
        if let Some(Value::Array(deleted)) = parts.get(2) {
            claimed
                .deleted
                .extend(deleted.iter().filter_map(value_to_string));
        }

        Ok(claimed)
    }

    /// XPENDING key group start end count [consumer]
    pub async fn xpending_range(
        &mut self,
        stream_key: &str,
        group: &str,
        start: &str,
        end: &str,
        count: usize,
        consumer: Option<&str>,
    ) -> Result<Vec<PendingEntry>> {
        let mut cmd = redis::cmd("XPENDING");
        cmd.arg(stream_key).arg(group).arg(start).arg(end).arg(count);
        if let Some(consumer) = consumer {
            cmd.arg(consumer);
        }

        let reply: Value = cmd.query_async(self.connection_mut()).await?;
        let Value::Array(rows) = reply else {
            return Ok(Vec::new());
        };

        let mut pending = Vec::with_capacity(rows.len());
        for row in rows {
            let Value::Array(cols) = row else {
                continue;
            };
            if let [id, consumer, idle, deliveries] = cols.as_slice() {
                pending.push(PendingEntry {
                    id: value_to_string(id).unwrap_or_default(),
                    consumer: value_to_string(consumer).unwrap_or_default(),
                    idle_ms: value_to_u64(idle).unwrap_or(0),
                    delivery_count: value_to_u64(deliveries).unwrap_or(0),
                });
            }
        }
        Ok(pending)
    }

    /// XINFO GROUPS key, narrowed to one group
    pub async fn xinfo_group(&mut self, stream_key: &str, group: &str) -> Result<Option<GroupInfo>> {
        let reply: Value = redis::cmd("XINFO")
            .arg("GROUPS")
            .arg(stream_key)
            .query_async(self.connection_mut())
            .await?;

        let Value::Array(groups) = reply else {
            return Ok(None);
        };

        for raw in &groups {
            let mut info = GroupInfo::default();
            for (key, value) in key_value_pairs(raw) {
                match key.as_str() {
                    "name" => info.name = value_to_string(value).unwrap_or_default(),
                    "pending" => info.pending = value_to_u64(value).unwrap_or(0),
                    "last-delivered-id" => {
                        info.last_delivered_id = value_to_string(value).unwrap_or_default()
                    }
                    "lag" => info.lag = value_to_u64(value),
                    _ => {}
                }
            }
            if info.name == group {
                return Ok(Some(info));
            }
        }
        Ok(None)
    }

    /// XACK - Acknowledge stream entries
    pub async fn xack(&mut self, stream_key: &str, group: &str, ids: &[String]) -> Result<i64> {
        if ids.is_empty() {
            return Ok(0);
        }
        redis::cmd("XACK")
            .arg(stream_key)
            .arg(group)
            .arg(ids)
            .query_async(self.connection_mut())
            .await
    }

    /// Count entries strictly after `after_id`, scanning at most `limit` entries
    ///
    /// Fallback for lag when XINFO cannot report it (Redis < 7, or after
    /// trimming past the group cursor).
    pub async fn xcount_after(&mut self, stream_key: &str, after_id: &str, limit: usize) -> Result<usize> {
        let start = format!("({}", after_id);
        let reply: Value = redis::cmd("XRANGE")
            .arg(stream_key)
            .arg(start)
            .arg("+")
            .arg("COUNT")
            .arg(limit)
            .query_async(self.connection_mut())
            .await?;
        match reply {
            Value::Array(entries) => Ok(entries.len()),
            _ => Ok(0),
        }
    }

    /// XLEN - Get stream length
    pub async fn xlen(&mut self, stream_key: &str) -> Result<i64> {
        redis::cmd("XLEN")
            .arg(stream_key)
            .query_async(self.connection_mut())
            .await
    }
}
