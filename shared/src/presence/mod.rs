// ============================================================================
// Presence Registry
// ============================================================================
//
// Shared view of which sockets a user currently has open, visible to every
// delivery worker no matter which transport instance holds the socket.
//
//   connections(user) → socket refs (empty = offline)
//   emit(socket, payload) → false when the socket is gone
//
// The transport layer owns registration; the pipeline only reads and emits.
//
// ============================================================================

mod memory;
mod redis;

pub use memory::InMemoryPresence;
pub use redis::RedisPresence;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;

/// `{instance_id}:{connection_id}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SocketRef {
    pub instance_id: String,
    pub connection_id: String,
}

impl SocketRef {
    pub fn new(instance_id: impl Into<String>, connection_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            connection_id: connection_id.into(),
        }
    }
}

impl fmt::Display for SocketRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.instance_id, self.connection_id)
    }
}

impl FromStr for SocketRef {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((instance, connection)) if !instance.is_empty() && !connection.is_empty() => {
                Ok(SocketRef::new(instance, connection))
            }
            _ => Err(anyhow!("invalid socket ref: {}", s)),
        }
    }
}

#[async_trait]
pub trait PresenceRegistry: Send + Sync {
    /// Live sockets of `user_id`; empty when offline
    async fn connections(&self, user_id: &str) -> Result<Vec<SocketRef>>;

    /// Push `payload` to one socket; `Ok(false)` if nobody received it
    async fn emit(&self, socket: &SocketRef, payload: &serde_json::Value) -> Result<bool>;
}
