use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Priority
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Normal => "NORMAL",
            Priority::High => "HIGH",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(Priority::Low),
            "NORMAL" => Ok(Priority::Normal),
            "HIGH" => Ok(Priority::High),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}

// ============================================================================
// MessageEnvelope
// ============================================================================

pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EnvelopeMetadata {
    pub content: String,
    pub content_type: String,
    #[serde(default)]
    pub priority: Priority,
    /// Pipeline attempts already spent on this entry (in-flight copy only)
    #[serde(default)]
    pub retry_count: u32,
    pub recipient_ids: Vec<String>,
}

/// The unit appended to a partition and moved read-only through the pipeline.
///
/// Stages that need to annotate an envelope (e.g. `retry_count`) do so on the
/// copy they forward; see [`MessageEnvelope::with_retry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MessageEnvelope {
    pub message_id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub created_at: DateTime<Utc>,
    pub idempotency_key: String,
    pub correlation_id: String,
    /// Indirection for bodies stored outside the log
    #[serde(default)]
    pub payload_key: Option<String>,
    pub metadata: EnvelopeMetadata,
}

impl MessageEnvelope {
    /// Structural checks a decoded envelope must pass before it is processed.
    /// A failure here can never succeed on retry.
    pub fn validate(&self) -> Result<(), String> {
        if self.message_id.is_empty() {
            return Err("messageId is empty".to_string());
        }
        if self.conversation_id.is_empty() {
            return Err("conversationId is empty".to_string());
        }
        if self.sender_id.is_empty() {
            return Err("senderId is empty".to_string());
        }
        if self.idempotency_key.is_empty() {
            return Err("idempotencyKey is empty".to_string());
        }
        if self.metadata.content.is_empty() && self.payload_key.is_none() {
            return Err("envelope has neither content nor payloadKey".to_string());
        }
        if self.metadata.recipient_ids.iter().any(|r| r.is_empty()) {
            return Err("recipientIds contains an empty id".to_string());
        }
        Ok(())
    }

    /// Copy of this envelope with `retry_count` set, for the next attempt
    pub fn with_retry(&self, retry_count: u32) -> Self {
        let mut next = self.clone();
        next.metadata.retry_count = retry_count;
        next
    }

    pub fn recipients(&self) -> &[String] {
        &self.metadata.recipient_ids
    }
}

#[cfg(test)]
pub(crate) fn sample_envelope() -> MessageEnvelope {
    MessageEnvelope {
        message_id: "0b3c1f1e-0000-4000-8000-000000000001".to_string(),
        conversation_id: "conv_1".to_string(),
        sender_id: "alice".to_string(),
        created_at: Utc::now(),
        idempotency_key: "k1".to_string(),
        correlation_id: "corr-1".to_string(),
        payload_key: None,
        metadata: EnvelopeMetadata {
            content: "hello".to_string(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            priority: Priority::High,
            retry_count: 0,
            recipient_ids: vec!["bob".to_string(), "carol".to_string()],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_wire_format() {
        assert_eq!(serde_json::to_string(&Priority::High).unwrap(), "\"HIGH\"");
        assert_eq!("LOW".parse::<Priority>().unwrap(), Priority::Low);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_msgpack_named_fields() {
        let envelope = sample_envelope();
        let bytes = rmp_serde::to_vec_named(&envelope).unwrap();
        let decoded: MessageEnvelope = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_unknown_metadata_field_rejected() {
        let json = r#"{
            "content": "hi",
            "contentType": "text/plain",
            "priority": "NORMAL",
            "retryCount": 0,
            "recipientIds": ["bob"],
            "mood": "happy"
        }"#;
        assert!(serde_json::from_str::<EnvelopeMetadata>(json).is_err());
    }

    #[test]
    fn test_validate() {
        let mut envelope = sample_envelope();
        assert!(envelope.validate().is_ok());

        envelope.metadata.content.clear();
        assert!(envelope.validate().is_err());

        envelope.payload_key = Some("blob/123".to_string());
        assert!(envelope.validate().is_ok());

        envelope.sender_id.clear();
        assert!(envelope.validate().is_err());
    }

    #[test]
    fn test_with_retry_leaves_original_untouched() {
        let envelope = sample_envelope();
        let retried = envelope.with_retry(3);
        assert_eq!(envelope.metadata.retry_count, 0);
        assert_eq!(retried.metadata.retry_count, 3);
        assert_eq!(retried.message_id, envelope.message_id);
    }
}
