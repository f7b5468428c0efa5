use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::Priority;

/// Device push request for a recipient with no live connection.
///
/// Jobs are deduplicated by (message_id, recipient_id); the push delivery
/// service resolves device tokens from `recipient_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushJob {
    pub message_id: String,
    pub recipient_id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub priority: Priority,
    /// Notification body (content preview, never the payload indirection)
    pub preview: String,
    pub enqueued_at: DateTime<Utc>,
}

/// Upper bound on the content preview carried in a push job
pub const PUSH_PREVIEW_CHARS: usize = 140;

impl PushJob {
    pub fn preview_of(content: &str) -> String {
        content.chars().take(PUSH_PREVIEW_CHARS).collect()
    }
}
