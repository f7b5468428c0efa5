// ============================================================================
// Delivery Pipeline Tests
// ============================================================================
//
// Persistence idempotency, fanout/push routing, retries and dead-lettering.
//
// ============================================================================

mod test_utils;

use courier_error::DeadLetterReason;
use courier_shared::InMemoryServices;
use courier_shared::log::PartitionedLog;
use courier_shared::pipeline::{Disposition, PipelineState};
use courier_types::ReceiptState;
use std::time::Duration;
use test_utils::{
    append_envelope, consumer, dequeue_one, drain, envelope, online, pipeline, producer, send_request,
};

#[tokio::test]
async fn test_redelivery_after_crash_does_not_duplicate() {
    let mem = InMemoryServices::new();
    let env = envelope("conv_1", "hello", &["bob"]);
    let bob = online(&mem, "bob");
    append_envelope(&mem, 0, &env).await;

    // first consumer applies the entry, then dies before acknowledging
    let first = consumer(&mem, "c1");
    first.ensure_group(0).await.unwrap();
    let entry = dequeue_one(&first, 0).await;
    let disposition = pipeline(&mem, 3, 10).process(&entry).await.unwrap();
    assert!(matches!(disposition, Disposition::Delivered { was_inserted: true, .. }));
    drop(first);

    mem.log.age_pending(0, Duration::from_secs(120));
    let second = consumer(&mem, "c2");
    let redelivered = dequeue_one(&second, 0).await;
    assert!(redelivered.reclaimed);
    assert_eq!(redelivered.offset, entry.offset);
    assert_eq!(redelivered.delivery_count, 2);

    let disposition = pipeline(&mem, 3, 10).process(&redelivered).await.unwrap();
    assert!(matches!(
        disposition,
        Disposition::Delivered { was_inserted: false, delivered: 1, .. }
    ));
    second.acknowledge(0, &[redelivered.offset]).await.unwrap();

    assert_eq!(mem.store.message_count(), 1);
    assert_eq!(mem.store.receipt_count(), 1);
    assert!(mem.store.has_receipt(&env.message_id, "bob", ReceiptState::Delivered));
    // at-least-once towards the socket
    assert_eq!(mem.presence.emitted_to(&bob), 2);
    assert_eq!(second.partition_lag(0).await.unwrap(), 0);
}

#[tokio::test]
async fn test_timeout_after_commit_still_fans_out() {
    let mem = InMemoryServices::new();
    let env = envelope("conv_1", "hello", &["bob"]);
    online(&mem, "bob");
    append_envelope(&mem, 0, &env).await;
    mem.store.fail_after_write(1);

    let c = consumer(&mem, "c1");
    c.ensure_group(0).await.unwrap();
    let entry = dequeue_one(&c, 0).await;
    let disposition = pipeline(&mem, 3, 10).process(&entry).await.unwrap();

    // second attempt finds the row and carries on
    match disposition {
        Disposition::Delivered {
            was_inserted,
            delivered,
            attempts,
            ..
        } => {
            assert!(!was_inserted);
            assert_eq!(delivered, 1);
            assert_eq!(attempts, 2);
        }
        other => panic!("unexpected disposition {:?}", other),
    }
    assert_eq!(mem.store.message_count(), 1);
    assert!(mem.store.has_receipt(&env.message_id, "bob", ReceiptState::Delivered));
}

#[tokio::test]
async fn test_retries_exhausted_goes_to_dead_letter() {
    let mem = InMemoryServices::new();
    let producer = producer(&mem, 1);
    let ack = producer
        .ingest(send_request("conv_1", "alice", "hello", Some("c-1"), &["bob"]))
        .await
        .unwrap();
    mem.store.fail_next_inserts(10);

    let c = consumer(&mem, "c1");
    let report = drain(&mem, 0, c.clone(), pipeline(&mem, 3, 10)).await;
    assert_eq!(report.acknowledged, 1);
    assert_eq!(report.dead_lettered, 1);

    let records = mem.dead_letter.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.reason, DeadLetterReason::RetriesExhausted.as_str());
    assert_eq!(record.partition, 0);
    assert_eq!(record.retry_count, 2);
    assert_eq!(record.envelope.as_ref().unwrap().message_id, ack.message_id);
    assert!(record.error_detail.contains("after 3 attempts"));
    assert!(!record.offset.is_empty());

    assert_eq!(mem.store.message_count(), 0);
    assert_eq!(c.partition_lag(0).await.unwrap(), 0);
}

#[tokio::test]
async fn test_malformed_entry_is_dead_lettered_with_raw_payload() {
    let mem = InMemoryServices::new();
    let offset = mem.log.append(0, "junk", vec![0xc1, 0x00, 0xff]).await.unwrap();
    let good = envelope("conv_1", "after junk", &["bob"]);
    append_envelope(&mem, 0, &good).await;

    let c = consumer(&mem, "c1");
    let report = drain(&mem, 0, c.clone(), pipeline(&mem, 3, 10)).await;
    assert_eq!(report.acknowledged, 2);
    assert_eq!(report.dead_lettered, 1);

    let records = mem.dead_letter.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].reason, "malformed_envelope");
    assert_eq!(records[0].offset, offset.to_string());
    assert!(records[0].envelope.is_none());
    assert_eq!(records[0].raw_payload_base64.as_deref(), Some("wQD/"));

    // the poison entry does not block the conversation
    assert_eq!(mem.store.persisted_contents(), vec!["after junk"]);
}

#[tokio::test]
async fn test_invalid_envelope_is_not_retried() {
    let mem = InMemoryServices::new();
    let mut env = envelope("conv_1", "hello", &["bob"]);
    env.sender_id.clear();
    append_envelope(&mem, 0, &env).await;

    let c = consumer(&mem, "c1");
    c.ensure_group(0).await.unwrap();
    let entry = dequeue_one(&c, 0).await;
    let disposition = pipeline(&mem, 5, 10).process(&entry).await.unwrap();

    assert_eq!(
        disposition,
        Disposition::DeadLettered {
            reason: DeadLetterReason::InvalidEnvelope
        }
    );
    assert_eq!(disposition.state(), PipelineState::DeadLettered);
    assert_eq!(mem.store.message_count(), 0);
    assert_eq!(mem.dead_letter.records()[0].retry_count, 0);
}

#[tokio::test]
async fn test_redelivery_cap_dead_letters_entry() {
    let mem = InMemoryServices::new();
    append_envelope(&mem, 0, &envelope("conv_1", "hello", &["bob"])).await;

    let c = consumer(&mem, "c1");
    c.ensure_group(0).await.unwrap();
    // handed out three times without ever being acknowledged
    for _ in 0..2 {
        dequeue_one(&c, 0).await;
        c.abandon(0);
    }
    let entry = dequeue_one(&c, 0).await;
    assert_eq!(entry.delivery_count, 3);

    let disposition = pipeline(&mem, 3, 2).process(&entry).await.unwrap();
    assert_eq!(
        disposition,
        Disposition::DeadLettered {
            reason: DeadLetterReason::RedeliveryExhausted
        }
    );
    assert_eq!(mem.store.message_count(), 0);
}

#[tokio::test]
async fn test_failing_recipient_does_not_block_others() {
    let mem = InMemoryServices::new();
    let env = envelope("conv_1", "hello", &["bob", "carol", "dave"]);
    let bob = online(&mem, "bob");
    online(&mem, "carol");
    mem.store.fail_receipts_for("carol");
    append_envelope(&mem, 0, &env).await;

    let c = consumer(&mem, "c1");
    let report = drain(&mem, 0, c, pipeline(&mem, 3, 10)).await;
    assert_eq!(report.dead_lettered, 1);

    // bob and dave were served once, not once per attempt
    assert_eq!(mem.presence.emitted_to(&bob), 1);
    assert!(mem.store.has_receipt(&env.message_id, "bob", ReceiptState::Delivered));
    assert_eq!(mem.push.jobs_for("dave"), 1);
    assert!(!mem.store.has_receipt(&env.message_id, "carol", ReceiptState::Delivered));
    assert_eq!(mem.store.message_count(), 1);

    let record = &mem.dead_letter.records()[0];
    assert_eq!(record.reason, "retries_exhausted");
    assert!(record.error_detail.contains("not reached"));
}

#[tokio::test]
async fn test_transient_presence_failure_recovers_on_retry() {
    let mem = InMemoryServices::new();
    let env = envelope("conv_1", "hello", &["bob"]);
    online(&mem, "bob");
    mem.presence.fail_lookups_for("bob");
    append_envelope(&mem, 0, &env).await;

    let c = consumer(&mem, "c1");
    c.ensure_group(0).await.unwrap();
    let entry = dequeue_one(&c, 0).await;

    let pipeline = pipeline(&mem, 50, 10);
    let healer = {
        let presence = mem.presence.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            presence.heal();
        })
    };
    let disposition = pipeline.process(&entry).await.unwrap();
    healer.await.unwrap();

    match disposition {
        Disposition::Delivered {
            delivered, attempts, ..
        } => {
            assert_eq!(delivered, 1);
            assert!(attempts > 1);
        }
        other => panic!("unexpected disposition {:?}", other),
    }
    assert!(mem.dead_letter.records().is_empty());
}

#[tokio::test]
async fn test_offline_recipient_gets_one_push_job() {
    let mem = InMemoryServices::new();
    let env = envelope("conv_1", "see you at 8", &["bob"]);
    append_envelope(&mem, 0, &env).await;

    let c = consumer(&mem, "c1");
    c.ensure_group(0).await.unwrap();
    let entry = dequeue_one(&c, 0).await;
    let pipeline = pipeline(&mem, 3, 10);

    let first = pipeline.process(&entry).await.unwrap();
    assert!(matches!(first, Disposition::Delivered { delivered: 0, pushed: 1, .. }));
    // replay of the same entry hits the push dedup key
    let second = pipeline.process(&entry).await.unwrap();
    assert!(matches!(second, Disposition::Delivered { pushed: 1, .. }));

    let jobs = mem.push.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].message_id, env.message_id);
    assert_eq!(jobs[0].recipient_id, "bob");
    assert_eq!(jobs[0].preview, "see you at 8");
    assert_eq!(mem.store.receipt_count(), 0);
}

#[tokio::test]
async fn test_stale_socket_falls_back_to_push() {
    let mem = InMemoryServices::new();
    let env = envelope("conv_1", "hello", &["bob"]);
    let socket = online(&mem, "bob");
    mem.presence.mark_gone(&socket);
    append_envelope(&mem, 0, &env).await;

    let c = consumer(&mem, "c1");
    let report = drain(&mem, 0, c, pipeline(&mem, 3, 10)).await;
    assert_eq!(report.acknowledged, 1);

    assert_eq!(mem.presence.emitted_to(&socket), 0);
    assert_eq!(mem.push.jobs_for("bob"), 1);
    assert!(!mem.store.has_receipt(&env.message_id, "bob", ReceiptState::Delivered));
}

#[tokio::test]
async fn test_dead_letter_write_failure_leaves_entry_pending() {
    let mem = InMemoryServices::new();
    mem.log.append(0, "junk", vec![0xc1]).await.unwrap();
    append_envelope(&mem, 0, &envelope("conv_1", "next", &["bob"])).await;
    mem.dead_letter.fail_next(1);

    let c = consumer(&mem, "c1");
    let p = pipeline(&mem, 3, 10);
    let report = drain(&mem, 0, c.clone(), p.clone()).await;
    assert_eq!(report.acknowledged, 0);
    assert_eq!(report.stalled, 2);
    assert!(mem.dead_letter.records().is_empty());
    assert!(mem.store.persisted_contents().is_empty());
    assert!(c.is_recovering(0));

    // the next pass reclaims the backlog and settles both in order
    let report = drain(&mem, 0, c.clone(), p).await;
    assert_eq!(report.acknowledged, 2);
    assert_eq!(report.dead_lettered, 1);
    assert_eq!(mem.store.persisted_contents(), vec!["next"]);
    assert_eq!(c.partition_lag(0).await.unwrap(), 0);
}
