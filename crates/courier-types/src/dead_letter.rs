use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::MessageEnvelope;

/// Terminal record for an entry that could not be processed.
///
/// `envelope` is `None` when the log entry could not be decoded; the raw
/// payload is kept base64-encoded instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    pub envelope: Option<MessageEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_payload_base64: Option<String>,
    pub reason: String,
    pub error_detail: String,
    pub partition: u32,
    pub offset: String,
    pub retry_count: u32,
    pub dead_lettered_at: DateTime<Utc>,
}
