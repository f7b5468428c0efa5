use crate::store::MessageStore;
use courier_error::{DeadLetterReason, DeliveryError, Stage};
use courier_metrics::{IDEMPOTENT_HITS_TOTAL, PIPELINE_STAGE_DURATION_SECONDS, PIPELINE_STAGE_TOTAL};
use courier_types::MessageEnvelope;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Idempotent durable write keyed by the envelope's idempotency key
pub struct PersistenceWorker {
    store: Arc<dyn MessageStore>,
}

impl PersistenceWorker {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    /// `Ok(false)` when the message was already stored by an earlier attempt
    pub async fn persist(&self, envelope: &MessageEnvelope) -> Result<bool, DeliveryError> {
        let started = Instant::now();
        let result = self.store.insert_if_absent(envelope).await;
        PIPELINE_STAGE_DURATION_SECONDS
            .with_label_values(&["persist"])
            .observe(started.elapsed().as_secs_f64());

        match result {
            Ok(true) => {
                PIPELINE_STAGE_TOTAL.with_label_values(&["persist", "inserted"]).inc();
                Ok(true)
            }
            Ok(false) => {
                PIPELINE_STAGE_TOTAL.with_label_values(&["persist", "duplicate"]).inc();
                IDEMPOTENT_HITS_TOTAL.with_label_values(&["persistence"]).inc();
                debug!(message_id = %envelope.message_id, "Message already persisted");
                Ok(false)
            }
            Err(e) => {
                PIPELINE_STAGE_TOTAL.with_label_values(&["persist", "error"]).inc();
                Err(classify_store_error(e))
            }
        }
    }
}

/// Data and constraint errors (SQLSTATE classes 22, 23) will fail the same
/// way on every attempt; anything else is worth retrying.
fn classify_store_error(err: anyhow::Error) -> DeliveryError {
    let sqlstate = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<sqlx::Error>())
        .and_then(|e| match e {
            sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
            _ => None,
        });

    match sqlstate {
        Some(code) if code.starts_with("22") || code.starts_with("23") => DeliveryError::poison(
            DeadLetterReason::InvalidEnvelope,
            format!("message store rejected row (SQLSTATE {}): {:#}", code, err),
        ),
        _ => DeliveryError::transient(Stage::Persist, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_errors_are_transient() {
        let err = classify_store_error(anyhow::anyhow!("connection reset"));
        assert!(err.is_retryable());
        assert_eq!(err.stage(), Stage::Persist);
    }
}
