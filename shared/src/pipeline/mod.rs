// ============================================================================
// Delivery Pipeline
// ============================================================================
//
// Per dequeued entry:
//
//   received → persisted → fanned_out → (caller acks) → acknowledged
//        \__________________________________________
//                                                   → failed → dead_lettered
//
// - poison (undecodable, invalid, redelivered too often): dead-lettered at once
// - transient stage failure: retried in-process with exponential backoff,
//   `retry_count` bumped on the in-flight copy; dead-lettered once the
//   attempts are spent
// - duplicate persist (`was_inserted = false`) is not a failure: fanout and
//   push still run, since an earlier attempt may have crashed between them
//
// Progress is remembered across attempts, so a retry only revisits
// recipients that were not yet served.
//
// `process` returns Err only when the entry could neither be delivered nor
// dead-lettered; the caller must then leave it unacknowledged.
//
// ============================================================================

pub mod fanout;
pub mod persistence;
pub mod push;

pub use fanout::{FanoutOutcome, FanoutWorker};
pub use persistence::PersistenceWorker;
pub use push::{PushOutcome, PushWorker};

use crate::consumer::{EntryPayload, LogEntry};
use crate::context::DeliveryServices;
use crate::dead_letter::DeadLetterSink;
use crate::retry::RetryPolicy;
use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::Utc;
use courier_config::DeliveryPolicy;
use courier_error::{DeadLetterReason, DeliveryError, Stage};
use courier_metrics::{DEAD_LETTER_TOTAL, RETRIES_TOTAL};
use courier_types::{DeadLetterRecord, MessageEnvelope};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Received,
    Persisted,
    FannedOut,
    Acknowledged,
    Failed,
    DeadLettered,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Received => "received",
            PipelineState::Persisted => "persisted",
            PipelineState::FannedOut => "fanned_out",
            PipelineState::Acknowledged => "acknowledged",
            PipelineState::Failed => "failed",
            PipelineState::DeadLettered => "dead_lettered",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of `process`; either way the entry may be acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Delivered {
        was_inserted: bool,
        /// Recipients reached on a live socket
        delivered: usize,
        /// Recipients handed to the push queue (new or already queued)
        pushed: usize,
        attempts: u32,
    },
    DeadLettered {
        reason: DeadLetterReason,
    },
}

impl Disposition {
    pub fn state(&self) -> PipelineState {
        match self {
            Disposition::Delivered { .. } => PipelineState::FannedOut,
            Disposition::DeadLettered { .. } => PipelineState::DeadLettered,
        }
    }
}

/// What earlier attempts of the same entry already achieved
#[derive(Debug, Default)]
struct Progress {
    state: Option<PipelineState>,
    was_inserted: Option<bool>,
    served: HashSet<String>,
    delivered: usize,
    pushed: usize,
}

impl Progress {
    fn advance(&mut self, message_id: &str, next: PipelineState) {
        debug!(message_id = %message_id, from = ?self.state, to = %next, "Pipeline transition");
        self.state = Some(next);
    }
}

pub struct DeliveryPipeline {
    persistence: PersistenceWorker,
    fanout: FanoutWorker,
    push: PushWorker,
    dead_letter: Arc<dyn DeadLetterSink>,
    retry: RetryPolicy,
    max_deliveries: u32,
}

impl DeliveryPipeline {
    pub fn new(
        persistence: PersistenceWorker,
        fanout: FanoutWorker,
        push: PushWorker,
        dead_letter: Arc<dyn DeadLetterSink>,
        retry: RetryPolicy,
        max_deliveries: u32,
    ) -> Self {
        Self {
            persistence,
            fanout,
            push,
            dead_letter,
            retry,
            max_deliveries,
        }
    }

    pub fn from_services(services: &DeliveryServices, policy: &DeliveryPolicy, log_salt: &str) -> Self {
        Self::new(
            PersistenceWorker::new(services.store.clone()),
            FanoutWorker::new(services.presence.clone(), services.store.clone(), log_salt),
            PushWorker::new(services.push.clone(), log_salt),
            services.dead_letter.clone(),
            RetryPolicy::from_policy(policy),
            policy.max_deliveries,
        )
    }

    pub async fn process(&self, entry: &LogEntry) -> Result<Disposition> {
        let envelope = match &entry.payload {
            EntryPayload::Envelope(envelope) => envelope,
            EntryPayload::Malformed { raw, error } => {
                let record = DeadLetterRecord {
                    envelope: None,
                    raw_payload_base64: Some(BASE64.encode(raw)),
                    reason: DeadLetterReason::MalformedEnvelope.to_string(),
                    error_detail: error.clone(),
                    partition: entry.partition,
                    offset: entry.offset.to_string(),
                    retry_count: 0,
                    dead_lettered_at: Utc::now(),
                };
                return self
                    .dead_letter_entry(DeadLetterReason::MalformedEnvelope, record)
                    .await;
            }
        };

        if let Err(detail) = envelope.validate() {
            return self
                .dead_letter_entry(
                    DeadLetterReason::InvalidEnvelope,
                    record_for(entry, envelope, DeadLetterReason::InvalidEnvelope, detail),
                )
                .await;
        }

        if entry.delivery_count > u64::from(self.max_deliveries) {
            let detail = format!(
                "delivered {} times, limit is {}",
                entry.delivery_count, self.max_deliveries
            );
            return self
                .dead_letter_entry(
                    DeadLetterReason::RedeliveryExhausted,
                    record_for(entry, envelope, DeadLetterReason::RedeliveryExhausted, detail),
                )
                .await;
        }

        let mut progress = Progress::default();
        progress.advance(&envelope.message_id, PipelineState::Received);

        let mut attempt = 1;
        loop {
            let in_flight = envelope.with_retry(attempt - 1);
            match self.attempt(&in_flight, &mut progress).await {
                Ok(()) => {
                    return Ok(Disposition::Delivered {
                        was_inserted: progress.was_inserted.unwrap_or(false),
                        delivered: progress.delivered,
                        pushed: progress.pushed,
                        attempts: attempt,
                    });
                }
                Err(DeliveryError::Poison { reason, detail }) => {
                    progress.advance(&envelope.message_id, PipelineState::Failed);
                    return self
                        .dead_letter_entry(reason, record_for(entry, &in_flight, reason, detail))
                        .await;
                }
                Err(err) => {
                    if !self.retry.has_attempts_left(attempt) {
                        progress.advance(&envelope.message_id, PipelineState::Failed);
                        let detail = format!("{} (after {} attempts)", err, attempt);
                        return self
                            .dead_letter_entry(
                                DeadLetterReason::RetriesExhausted,
                                record_for(entry, &in_flight, DeadLetterReason::RetriesExhausted, detail),
                            )
                            .await;
                    }

                    let delay = self.retry.backoff(attempt);
                    RETRIES_TOTAL.with_label_values(&[err.stage().as_str()]).inc();
                    warn!(
                        message_id = %envelope.message_id,
                        partition = entry.partition,
                        offset = %entry.offset,
                        attempt = attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient pipeline failure, will retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(&self, envelope: &MessageEnvelope, progress: &mut Progress) -> Result<(), DeliveryError> {
        if progress.was_inserted.is_none() {
            let was_inserted = self.persistence.persist(envelope).await?;
            progress.was_inserted = Some(was_inserted);
            progress.advance(&envelope.message_id, PipelineState::Persisted);
        }

        let remaining: Vec<String> = envelope
            .recipients()
            .iter()
            .filter(|r| !progress.served.contains(*r))
            .cloned()
            .collect();

        let fanout = self.fanout.fan_out(envelope, &remaining).await;
        progress.delivered += fanout.delivered.len();
        progress.served.extend(fanout.delivered);

        let push = self.push.enqueue(envelope, &fanout.offline).await;
        progress.pushed += push.enqueued.len() + push.duplicates.len();
        progress.served.extend(push.enqueued);
        progress.served.extend(push.duplicates);

        if let Some((recipient_count, err)) = first_failure(fanout.failed) {
            return Err(DeliveryError::transient(
                Stage::Fanout,
                err.context(format!("{} recipient(s) not reached", recipient_count)),
            ));
        }
        if let Some((recipient_count, err)) = first_failure(push.failed) {
            return Err(DeliveryError::transient(
                Stage::Push,
                err.context(format!("{} push job(s) not queued", recipient_count)),
            ));
        }

        progress.advance(&envelope.message_id, PipelineState::FannedOut);
        Ok(())
    }

    async fn dead_letter_entry(&self, reason: DeadLetterReason, record: DeadLetterRecord) -> Result<Disposition> {
        self.dead_letter
            .send_to_dead_letter(&record)
            .await
            .with_context(|| format!("dead-letter write failed for {}/{}", record.partition, record.offset))?;

        DEAD_LETTER_TOTAL.with_label_values(&[reason.as_str()]).inc();
        error!(
            target: "dlq",
            message_id = record.envelope.as_ref().map(|e| e.message_id.as_str()).unwrap_or("<undecodable>"),
            partition = record.partition,
            offset = %record.offset,
            reason = %reason,
            retry_count = record.retry_count,
            error = %record.error_detail,
            "Entry moved to dead-letter sink"
        );
        Ok(Disposition::DeadLettered { reason })
    }
}

fn record_for(
    entry: &LogEntry,
    envelope: &MessageEnvelope,
    reason: DeadLetterReason,
    detail: String,
) -> DeadLetterRecord {
    DeadLetterRecord {
        envelope: Some(envelope.clone()),
        raw_payload_base64: None,
        reason: reason.to_string(),
        error_detail: detail,
        partition: entry.partition,
        offset: entry.offset.to_string(),
        retry_count: envelope.metadata.retry_count,
        dead_lettered_at: Utc::now(),
    }
}

fn first_failure(failed: Vec<(String, anyhow::Error)>) -> Option<(usize, anyhow::Error)> {
    let count = failed.len();
    failed.into_iter().next().map(|(_, err)| (count, err))
}
