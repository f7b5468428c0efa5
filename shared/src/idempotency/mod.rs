// ============================================================================
// Ingress Idempotency
// ============================================================================
//
// Fast-path cache in front of the log: the first request for a key reserves
// it with a `pending` record; later requests with the same key get the
// original message id back without appending again.
//
//   reserve  → SET NX (pending) | existing record
//   promote  → pending → accepted, once the log append succeeded
//   release  → delete, when the log append failed (so retries can proceed)
//
// The durable guarantee is the unique constraint in the message store; this
// cache only keeps duplicates off the log.
//
// ============================================================================

mod memory;
mod redis;

pub use memory::InMemoryIdempotencyStore;
pub use redis::RedisIdempotencyStore;

use crate::utils::sha256_joined;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_types::SendRequest;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    Pending,
    Accepted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyRecord {
    pub message_id: String,
    pub idempotency_key: String,
    pub state: RecordState,
    pub created_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn pending(message_id: impl Into<String>, idempotency_key: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            idempotency_key: idempotency_key.into(),
            state: RecordState::Pending,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    /// Key was free and now belongs to this request
    Reserved,
    /// Key already taken; carries the original record
    Existing(IdempotencyRecord),
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn reserve(&self, record: &IdempotencyRecord) -> Result<Reservation>;

    async fn promote(&self, record: &IdempotencyRecord) -> Result<()>;

    async fn release(&self, idempotency_key: &str) -> Result<()>;
}

/// Deterministic key for a client-identified send:
/// hex SHA-256 of `conversationId ␟ senderId ␟ clientMessageId`
pub fn derive_idempotency_key(conversation_id: &str, sender_id: &str, client_message_id: &str) -> String {
    sha256_joined(&[conversation_id, sender_id, client_message_id])
}

/// Explicit key wins, then the derived one. Without either, every send is
/// its own logical attempt and gets a random key.
///
/// Explicit keys are hashed together with the conversation and sender, so
/// two senders picking the same key never share a record.
pub fn resolve_idempotency_key(request: &SendRequest) -> String {
    if let Some(key) = &request.idempotency_key {
        return sha256_joined(&[&request.conversation_id, &request.sender_id, key]);
    }
    match &request.client_message_id {
        Some(client_id) => derive_idempotency_key(&request.conversation_id, &request.sender_id, client_id),
        None => uuid::Uuid::new_v4().simple().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(client_message_id: Option<&str>, key: Option<&str>) -> SendRequest {
        SendRequest {
            conversation_id: "conv_1".to_string(),
            sender_id: "alice".to_string(),
            content: "hi".to_string(),
            content_type: None,
            priority: None,
            client_message_id: client_message_id.map(String::from),
            idempotency_key: key.map(String::from),
            recipient_ids: vec!["bob".to_string()],
            correlation_id: None,
        }
    }

    #[test]
    fn test_derived_key_is_deterministic() {
        let a = resolve_idempotency_key(&request(Some("c-1"), None));
        let b = resolve_idempotency_key(&request(Some("c-1"), None));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, resolve_idempotency_key(&request(Some("c-2"), None)));
    }

    #[test]
    fn test_key_scoped_to_sender_and_conversation() {
        let base = derive_idempotency_key("conv_1", "alice", "c-1");
        assert_ne!(base, derive_idempotency_key("conv_2", "alice", "c-1"));
        assert_ne!(base, derive_idempotency_key("conv_1", "bob", "c-1"));
    }

    #[test]
    fn test_explicit_key_wins() {
        let explicit = resolve_idempotency_key(&request(Some("c-1"), Some("explicit")));
        assert_eq!(explicit, resolve_idempotency_key(&request(Some("c-2"), Some("explicit"))));
        assert_ne!(explicit, resolve_idempotency_key(&request(Some("c-1"), None)));
    }

    #[test]
    fn test_explicit_key_scoped_to_sender_and_conversation() {
        let mut other = request(None, Some("k1"));
        other.sender_id = "mallory".to_string();
        other.conversation_id = "conv_9".to_string();
        let mine = resolve_idempotency_key(&request(None, Some("k1")));
        assert_ne!(mine, "k1");
        assert_ne!(mine, resolve_idempotency_key(&other));
    }

    #[test]
    fn test_no_client_id_means_fresh_key() {
        let a = resolve_idempotency_key(&request(None, None));
        let b = resolve_idempotency_key(&request(None, None));
        assert_ne!(a, b);
    }

    #[test]
    fn test_record_json_shape() {
        let record = IdempotencyRecord::pending("m-1", "k-1");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["messageId"], "m-1");
        assert_eq!(json["state"], "pending");
    }
}
