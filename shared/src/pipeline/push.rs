use crate::push::PushQueue;
use crate::utils::log_safe_id;
use chrono::Utc;
use courier_metrics::{IDEMPOTENT_HITS_TOTAL, PIPELINE_STAGE_DURATION_SECONDS, PIPELINE_STAGE_TOTAL};
use courier_types::{MessageEnvelope, PushJob};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

#[derive(Debug, Default)]
pub struct PushOutcome {
    pub enqueued: Vec<String>,
    /// A job for this (message, recipient) was already queued
    pub duplicates: Vec<String>,
    pub failed: Vec<(String, anyhow::Error)>,
}

/// Queues device pushes for recipients without a live socket
pub struct PushWorker {
    queue: Arc<dyn PushQueue>,
    log_salt: String,
}

impl PushWorker {
    pub fn new(queue: Arc<dyn PushQueue>, log_salt: impl Into<String>) -> Self {
        Self {
            queue,
            log_salt: log_salt.into(),
        }
    }

    pub async fn enqueue(&self, envelope: &MessageEnvelope, recipients: &[String]) -> PushOutcome {
        let mut outcome = PushOutcome::default();
        if recipients.is_empty() {
            return outcome;
        }
        let started = Instant::now();

        for recipient in recipients {
            let job = PushJob {
                message_id: envelope.message_id.clone(),
                recipient_id: recipient.clone(),
                conversation_id: envelope.conversation_id.clone(),
                sender_id: envelope.sender_id.clone(),
                priority: envelope.metadata.priority,
                preview: PushJob::preview_of(&envelope.metadata.content),
                enqueued_at: Utc::now(),
            };
            match self.queue.enqueue_push(&job).await {
                Ok(true) => outcome.enqueued.push(recipient.clone()),
                Ok(false) => {
                    IDEMPOTENT_HITS_TOTAL.with_label_values(&["push"]).inc();
                    outcome.duplicates.push(recipient.clone());
                }
                Err(e) => {
                    warn!(
                        message_id = %envelope.message_id,
                        recipient_hash = %log_safe_id(recipient, &self.log_salt),
                        error = %e,
                        "Push enqueue failed"
                    );
                    outcome.failed.push((recipient.clone(), e));
                }
            }
        }

        PIPELINE_STAGE_DURATION_SECONDS
            .with_label_values(&["push"])
            .observe(started.elapsed().as_secs_f64());
        PIPELINE_STAGE_TOTAL
            .with_label_values(&["push", "enqueued"])
            .inc_by(outcome.enqueued.len() as u64);
        PIPELINE_STAGE_TOTAL
            .with_label_values(&["push", "duplicate"])
            .inc_by(outcome.duplicates.len() as u64);
        PIPELINE_STAGE_TOTAL
            .with_label_values(&["push", "error"])
            .inc_by(outcome.failed.len() as u64);
        outcome
    }
}
