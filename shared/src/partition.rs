//! Conversation → partition mapping
//!
//! The mapping must not change for the lifetime of a deployment's partition
//! count, across processes and releases, so it is built on SHA-256 rather
//! than `std`'s randomly seeded hasher. Changing `PARTITION_COUNT` remaps
//! conversations and needs an offline migration (drain every partition
//! first).

use sha2::{Digest, Sha256};

/// `u64::from_be_bytes(sha256(conversation_id)[0..8]) mod partition_count`
pub fn partition_for(conversation_id: &str, partition_count: u32) -> u32 {
    debug_assert!(partition_count > 0, "partition_count must be positive");
    let digest = Sha256::digest(conversation_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % u64::from(partition_count.max(1))) as u32
}

/// Stream key of one partition: `{prefix}:{partition}`
pub fn stream_key(prefix: &str, partition: u32) -> String {
    format!("{}:{}", prefix, partition)
}
