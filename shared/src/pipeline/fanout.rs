use crate::presence::PresenceRegistry;
use crate::store::MessageStore;
use crate::utils::log_safe_id;
use courier_metrics::{IDEMPOTENT_HITS_TOTAL, PIPELINE_STAGE_DURATION_SECONDS, PIPELINE_STAGE_TOTAL};
use courier_types::{MessageEnvelope, ReceiptState};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct FanoutOutcome {
    /// Emitted to at least one live socket, receipt recorded
    pub delivered: Vec<String>,
    /// No live socket; handed to the push worker
    pub offline: Vec<String>,
    /// Lookup, emission or receipt failed; retried with the entry
    pub failed: Vec<(String, anyhow::Error)>,
}

/// Pushes a message to every live socket of each recipient
pub struct FanoutWorker {
    presence: Arc<dyn PresenceRegistry>,
    store: Arc<dyn MessageStore>,
    log_salt: String,
}

impl FanoutWorker {
    pub fn new(presence: Arc<dyn PresenceRegistry>, store: Arc<dyn MessageStore>, log_salt: impl Into<String>) -> Self {
        Self {
            presence,
            store,
            log_salt: log_salt.into(),
        }
    }

    /// One recipient failing never stops the others
    pub async fn fan_out(&self, envelope: &MessageEnvelope, recipients: &[String]) -> FanoutOutcome {
        let started = Instant::now();
        let payload = json!({
            "type": "message",
            "message": envelope,
        });

        let mut outcome = FanoutOutcome::default();
        for recipient in recipients {
            match self.deliver_to(envelope, recipient, &payload).await {
                Ok(true) => outcome.delivered.push(recipient.clone()),
                Ok(false) => outcome.offline.push(recipient.clone()),
                Err(e) => {
                    warn!(
                        message_id = %envelope.message_id,
                        recipient_hash = %log_safe_id(recipient, &self.log_salt),
                        error = %e,
                        "Fanout to recipient failed"
                    );
                    outcome.failed.push((recipient.clone(), e));
                }
            }
        }

        PIPELINE_STAGE_DURATION_SECONDS
            .with_label_values(&["fanout"])
            .observe(started.elapsed().as_secs_f64());
        PIPELINE_STAGE_TOTAL
            .with_label_values(&["fanout", "delivered"])
            .inc_by(outcome.delivered.len() as u64);
        PIPELINE_STAGE_TOTAL
            .with_label_values(&["fanout", "offline"])
            .inc_by(outcome.offline.len() as u64);
        PIPELINE_STAGE_TOTAL
            .with_label_values(&["fanout", "error"])
            .inc_by(outcome.failed.len() as u64);
        outcome
    }

    async fn deliver_to(
        &self,
        envelope: &MessageEnvelope,
        recipient: &str,
        payload: &serde_json::Value,
    ) -> anyhow::Result<bool> {
        let sockets = self.presence.connections(recipient).await?;
        if sockets.is_empty() {
            return Ok(false);
        }

        let mut emitted = false;
        for socket in &sockets {
            if self.presence.emit(socket, payload).await? {
                emitted = true;
            } else {
                debug!(socket = %socket, "Socket gone, skipping");
            }
        }
        if !emitted {
            return Ok(false);
        }

        let applied = self
            .store
            .record_receipt(&envelope.message_id, recipient, ReceiptState::Delivered)
            .await?;
        if !applied {
            IDEMPOTENT_HITS_TOTAL.with_label_values(&["receipt"]).inc();
        }
        Ok(true)
    }
}
