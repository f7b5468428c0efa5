use serde::{Deserialize, Serialize};

use crate::envelope::Priority;

// ============================================================================
// Ingress request / acknowledgment
// ============================================================================

/// Inbound send request. Unknown fields are rejected at this boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SendRequest {
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    /// Client-generated id; re-sends with the same id collapse into one message
    #[serde(default)]
    pub client_message_id: Option<String>,
    /// Explicit idempotency key, takes precedence over `client_message_id`
    #[serde(default)]
    pub idempotency_key: Option<String>,
    pub recipient_ids: Vec<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl SendRequest {
    /// Size/shape validation against the configured ingress limits
    pub fn validate(&self, max_content_bytes: usize, max_recipients: usize) -> Result<(), String> {
        if self.conversation_id.trim().is_empty() {
            return Err("conversationId is required".to_string());
        }
        if self.sender_id.trim().is_empty() {
            return Err("senderId is required".to_string());
        }
        if self.content.is_empty() {
            return Err("content is required".to_string());
        }
        if self.content.len() > max_content_bytes {
            return Err(format!(
                "content is {} bytes, limit is {}",
                self.content.len(),
                max_content_bytes
            ));
        }
        if self.recipient_ids.is_empty() {
            return Err("at least one recipient is required".to_string());
        }
        if self.recipient_ids.len() > max_recipients {
            return Err(format!(
                "{} recipients, limit is {}",
                self.recipient_ids.len(),
                max_recipients
            ));
        }
        if self.recipient_ids.iter().any(|r| r.trim().is_empty()) {
            return Err("recipientIds contains an empty id".to_string());
        }
        if let Some(id) = &self.client_message_id {
            if id.trim().is_empty() {
                return Err("clientMessageId must not be blank".to_string());
            }
        }
        if let Some(key) = &self.idempotency_key {
            if key.trim().is_empty() {
                return Err("idempotencyKey must not be blank".to_string());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckState {
    /// Appended to the log, downstream processing not yet confirmed
    Pending,
}

/// Returned to the sender immediately after the log append
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgment {
    pub message_id: String,
    pub idempotency_key: String,
    pub idempotent_hit: bool,
    pub state: AckState,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SendRequest {
        SendRequest {
            conversation_id: "conv_1".to_string(),
            sender_id: "alice".to_string(),
            content: "hi".to_string(),
            content_type: None,
            priority: None,
            client_message_id: Some("c-1".to_string()),
            idempotency_key: None,
            recipient_ids: vec!["bob".to_string()],
            correlation_id: None,
        }
    }

    #[test]
    fn test_validate_limits() {
        assert!(request().validate(16, 4).is_ok());

        let mut big = request();
        big.content = "x".repeat(17);
        assert!(big.validate(16, 4).is_err());

        let mut crowd = request();
        crowd.recipient_ids = (0..5).map(|i| format!("u{}", i)).collect();
        assert!(crowd.validate(16, 4).is_err());

        let mut nobody = request();
        nobody.recipient_ids.clear();
        assert!(nobody.validate(16, 4).is_err());

        let mut blank = request();
        blank.client_message_id = Some("  ".to_string());
        assert!(blank.validate(16, 4).is_err());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let json = r#"{"conversationId":"c","senderId":"s","content":"x","recipientIds":["r"],"extra":1}"#;
        assert!(serde_json::from_str::<SendRequest>(json).is_err());

        let json = r#"{"conversationId":"c","senderId":"s","content":"x","recipientIds":["r"]}"#;
        let parsed: SendRequest = serde_json::from_str(json).unwrap();
        assert!(parsed.client_message_id.is_none());
    }

    #[test]
    fn test_acknowledgment_shape() {
        let ack = Acknowledgment {
            message_id: "m".to_string(),
            idempotency_key: "k".to_string(),
            idempotent_hit: false,
            state: AckState::Pending,
        };
        let value = serde_json::to_value(&ack).unwrap();
        assert_eq!(value["idempotentHit"], false);
        assert_eq!(value["state"], "pending");
    }
}
