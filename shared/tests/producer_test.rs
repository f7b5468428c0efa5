// ============================================================================
// Message Producer Tests
// ============================================================================
//
// Ingress idempotency, rollback on append failure, validation.
//
// ============================================================================

mod test_utils;

use courier_error::AppError;
use courier_shared::InMemoryServices;
use courier_shared::log::decode_envelope;
use courier_shared::partition::partition_for;
use courier_types::AckState;
use test_utils::{producer, send_request};

#[tokio::test]
async fn test_same_client_message_id_returns_same_message() {
    let mem = InMemoryServices::new();
    let producer = producer(&mem, 1);

    let first = producer
        .ingest(send_request("conv_1", "alice", "hello", Some("c-1"), &["bob"]))
        .await
        .unwrap();
    let second = producer
        .ingest(send_request("conv_1", "alice", "hello", Some("c-1"), &["bob"]))
        .await
        .unwrap();

    assert!(!first.idempotent_hit);
    assert_eq!(first.state, AckState::Pending);
    assert!(second.idempotent_hit);
    assert_eq!(second.message_id, first.message_id);
    assert_eq!(second.idempotency_key, first.idempotency_key);
    assert_eq!(mem.log.len(0), 1, "duplicate must not be appended");
}

#[tokio::test]
async fn test_distinct_sends_get_distinct_ids() {
    let mem = InMemoryServices::new();
    let producer = producer(&mem, 1);

    let a = producer
        .ingest(send_request("conv_1", "alice", "one", Some("c-1"), &["bob"]))
        .await
        .unwrap();
    let b = producer
        .ingest(send_request("conv_1", "alice", "two", Some("c-2"), &["bob"]))
        .await
        .unwrap();
    // no client id: never deduplicated
    let c = producer
        .ingest(send_request("conv_1", "alice", "three", None, &["bob"]))
        .await
        .unwrap();
    let d = producer
        .ingest(send_request("conv_1", "alice", "three", None, &["bob"]))
        .await
        .unwrap();

    assert_ne!(a.message_id, b.message_id);
    assert_ne!(c.message_id, d.message_id);
    assert!(!d.idempotent_hit);
    assert_eq!(mem.log.len(0), 4);
}

#[tokio::test]
async fn test_explicit_key_does_not_collide_across_senders() {
    let mem = InMemoryServices::new();
    let producer = producer(&mem, 1);
    let keyed = |conversation: &str, sender: &str, content: &str| {
        let mut request = send_request(conversation, sender, content, None, &["bob"]);
        request.idempotency_key = Some("k1".to_string());
        request
    };

    let alice = producer.ingest(keyed("conv_1", "alice", "from alice")).await.unwrap();
    let mallory = producer.ingest(keyed("conv_9", "mallory", "from mallory")).await.unwrap();
    let replay = producer.ingest(keyed("conv_1", "alice", "from alice")).await.unwrap();

    assert!(!mallory.idempotent_hit);
    assert_ne!(mallory.message_id, alice.message_id);
    assert_ne!(mallory.idempotency_key, alice.idempotency_key);
    assert!(replay.idempotent_hit);
    assert_eq!(replay.message_id, alice.message_id);
    assert_eq!(mem.log.len(0), 2);
}

#[tokio::test]
async fn test_append_failure_rolls_back_reservation() {
    let mem = InMemoryServices::new();
    let producer = producer(&mem, 1);
    mem.log.fail_next_appends(1);

    let err = producer
        .ingest(send_request("conv_1", "alice", "hello", Some("c-1"), &["bob"]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::LogUnavailable(_)));
    assert!(mem.idempotency.is_empty(), "reservation must be released");

    let retry = producer
        .ingest(send_request("conv_1", "alice", "hello", Some("c-1"), &["bob"]))
        .await
        .unwrap();
    assert!(!retry.idempotent_hit);
    assert_eq!(mem.log.len(0), 1);
}

#[tokio::test]
async fn test_cache_unavailable_rejects_without_append() {
    let mem = InMemoryServices::new();
    let producer = producer(&mem, 1);
    mem.idempotency.fail_next_reserves(1);

    let err = producer
        .ingest(send_request("conv_1", "alice", "hello", Some("c-1"), &["bob"]))
        .await
        .unwrap_err();
    assert_eq!(err.status_code().as_u16(), 503);
    assert!(mem.log.is_empty(0));
}

#[tokio::test]
async fn test_invalid_request_is_rejected() {
    let mem = InMemoryServices::new();
    let producer = producer(&mem, 1);

    let err = producer
        .ingest(send_request("conv_1", "alice", "hello", Some("c-1"), &[]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(err.status_code().as_u16(), 400);

    let too_big = "x".repeat(64 * 1024 + 1);
    assert!(
        producer
            .ingest(send_request("conv_1", "alice", &too_big, None, &["bob"]))
            .await
            .is_err()
    );
    assert!(mem.log.is_empty(0));
    assert!(mem.idempotency.is_empty());
}

#[tokio::test]
async fn test_envelope_lands_on_conversation_partition() {
    let mem = InMemoryServices::new();
    let producer = producer(&mem, 8);

    let ack = producer
        .ingest(send_request("conv_42", "alice", "hello", Some("c-1"), &["bob", "carol"]))
        .await
        .unwrap();

    let partition = partition_for("conv_42", 8);
    assert_eq!(mem.log.message_ids(partition), vec![ack.message_id.clone()]);

    let record = mem.idempotency.get(&ack.idempotency_key).unwrap();
    assert_eq!(record.message_id, ack.message_id);
    assert_eq!(record.state, courier_shared::idempotency::RecordState::Accepted);

    // payload decodes back into the envelope the pipeline will see
    let consumer = test_utils::consumer(&mem, "c1");
    consumer.ensure_group(partition).await.unwrap();
    let entry = test_utils::dequeue_one(&consumer, partition).await;
    let envelope = entry.envelope().unwrap();
    assert_eq!(envelope.message_id, ack.message_id);
    assert_eq!(envelope.metadata.recipient_ids, vec!["bob", "carol"]);
    assert_eq!(envelope.metadata.retry_count, 0);
    assert!(decode_envelope(b"not msgpack").is_err());
}
