// ============================================================================
// Message Producer
// ============================================================================
//
// ingest(request) → Acknowledgment
//
// 1. validate size/shape
// 2. resolve the idempotency key
// 3. reserve it in the idempotency cache; a hit returns the original
//    messageId with `idempotentHit = true` and appends nothing
// 4. append the envelope to partition(conversationId)
// 5. on append failure release the reservation, on success promote it
//
// The acknowledgment is returned as soon as the entry is in the log;
// persistence and fanout happen later in the delivery pipeline.
//
// ============================================================================

use crate::idempotency::{IdempotencyRecord, IdempotencyStore, Reservation, resolve_idempotency_key};
use crate::log::{PartitionedLog, encode_envelope};
use crate::partition::partition_for;
use crate::utils::log_safe_id;
use chrono::Utc;
use courier_config::IngressLimits;
use courier_error::{AppError, AppResult};
use courier_metrics::{IDEMPOTENT_HITS_TOTAL, MESSAGES_INGESTED_TOTAL};
use courier_types::{
    AckState, Acknowledgment, DEFAULT_CONTENT_TYPE, EnvelopeMetadata, MessageEnvelope, SendRequest,
};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct MessageProducer {
    log: Arc<dyn PartitionedLog>,
    idempotency: Arc<dyn IdempotencyStore>,
    partition_count: u32,
    limits: IngressLimits,
    log_salt: String,
}

impl MessageProducer {
    pub fn new(
        log: Arc<dyn PartitionedLog>,
        idempotency: Arc<dyn IdempotencyStore>,
        partition_count: u32,
        limits: IngressLimits,
        log_salt: impl Into<String>,
    ) -> Self {
        Self {
            log,
            idempotency,
            partition_count,
            limits,
            log_salt: log_salt.into(),
        }
    }

    pub async fn ingest(&self, request: SendRequest) -> AppResult<Acknowledgment> {
        if let Err(reason) = request.validate(self.limits.max_content_bytes, self.limits.max_recipients) {
            MESSAGES_INGESTED_TOTAL.with_label_values(&["rejected"]).inc();
            return Err(AppError::validation(reason));
        }

        let idempotency_key = resolve_idempotency_key(&request);
        let record = IdempotencyRecord::pending(Uuid::new_v4().to_string(), idempotency_key.clone());

        let reservation = self.idempotency.reserve(&record).await.map_err(|e| {
            warn!(error = %e, "Idempotency cache unavailable");
            AppError::log_unavailable("idempotency cache unavailable")
        })?;

        if let Reservation::Existing(existing) = reservation {
            MESSAGES_INGESTED_TOTAL.with_label_values(&["idempotent_hit"]).inc();
            IDEMPOTENT_HITS_TOTAL.with_label_values(&["ingress"]).inc();
            debug!(
                message_id = %existing.message_id,
                sender_hash = %log_safe_id(&request.sender_id, &self.log_salt),
                "Duplicate send collapsed at ingress"
            );
            return Ok(Acknowledgment {
                message_id: existing.message_id,
                idempotency_key,
                idempotent_hit: true,
                state: AckState::Pending,
            });
        }

        let envelope = build_envelope(request, &record);
        let partition = partition_for(&envelope.conversation_id, self.partition_count);

        let appended = match encode_envelope(&envelope) {
            Ok(payload) => self
                .log
                .append(partition, &envelope.message_id, payload)
                .await
                .map_err(|e| {
                    warn!(partition = partition, error = %e, "Log append failed");
                    AppError::log_unavailable("message log unavailable")
                }),
            Err(e) => Err(e),
        };

        let offset = match appended {
            Ok(offset) => offset,
            Err(e) => {
                // Roll back so a client retry is not answered with a phantom id
                if let Err(release_err) = self.idempotency.release(&record.idempotency_key).await {
                    warn!(error = %release_err, "Failed to release idempotency key after append failure");
                }
                MESSAGES_INGESTED_TOTAL.with_label_values(&["failed"]).inc();
                return Err(e);
            }
        };

        if let Err(e) = self.idempotency.promote(&record).await {
            warn!(error = %e, "Failed to promote idempotency record");
        }

        MESSAGES_INGESTED_TOTAL.with_label_values(&["accepted"]).inc();
        info!(
            message_id = %envelope.message_id,
            correlation_id = %envelope.correlation_id,
            partition = partition,
            offset = %offset,
            sender_hash = %log_safe_id(&envelope.sender_id, &self.log_salt),
            recipients = envelope.metadata.recipient_ids.len(),
            "Message accepted"
        );

        Ok(Acknowledgment {
            message_id: envelope.message_id,
            idempotency_key: envelope.idempotency_key,
            idempotent_hit: false,
            state: AckState::Pending,
        })
    }
}

fn build_envelope(request: SendRequest, record: &IdempotencyRecord) -> MessageEnvelope {
    MessageEnvelope {
        message_id: record.message_id.clone(),
        conversation_id: request.conversation_id,
        sender_id: request.sender_id,
        created_at: Utc::now(),
        idempotency_key: record.idempotency_key.clone(),
        correlation_id: request
            .correlation_id
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        payload_key: None,
        metadata: EnvelopeMetadata {
            content: request.content,
            content_type: request
                .content_type
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            priority: request.priority.unwrap_or_default(),
            retry_count: 0,
            recipient_ids: request.recipient_ids,
        },
    }
}
