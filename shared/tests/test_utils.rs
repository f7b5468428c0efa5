// ============================================================================
// Test Utilities for the delivery core
// ============================================================================
//
// Builds producers, consumers, pipelines and workers over the in-memory
// collaborators, with short timeouts and a 1ms retry backoff.
//
// ============================================================================

#![allow(dead_code)]

use courier_config::{DeliveryPolicy, IngressLimits, StreamConfig};
use courier_shared::consumer::{LogEntry, StreamConsumer};
use courier_shared::lease::LeaseManager;
use courier_shared::log::{PartitionedLog, encode_envelope};
use courier_shared::presence::SocketRef;
use courier_shared::worker::BatchReport;
use courier_shared::{DeliveryPipeline, InMemoryServices, MessageProducer, PartitionWorker};
use courier_types::{MessageEnvelope, SendRequest};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

pub const SALT: &str = "test-salt-that-is-super-secret";
pub const GROUP: &str = "courier-test";

pub fn send_request(
    conversation_id: &str,
    sender_id: &str,
    content: &str,
    client_message_id: Option<&str>,
    recipients: &[&str],
) -> SendRequest {
    SendRequest {
        conversation_id: conversation_id.to_string(),
        sender_id: sender_id.to_string(),
        content: content.to_string(),
        content_type: None,
        priority: None,
        client_message_id: client_message_id.map(String::from),
        idempotency_key: None,
        recipient_ids: recipients.iter().map(|r| r.to_string()).collect(),
        correlation_id: None,
    }
}

pub fn producer(mem: &InMemoryServices, partition_count: u32) -> MessageProducer {
    let services = mem.services();
    MessageProducer::new(
        services.log,
        services.idempotency,
        partition_count,
        IngressLimits::default(),
        SALT,
    )
}

pub fn policy(max_retries: u32, max_deliveries: u32) -> DeliveryPolicy {
    DeliveryPolicy {
        max_retries,
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 5,
        max_deliveries,
        ..DeliveryPolicy::default()
    }
}

pub fn pipeline(mem: &InMemoryServices, max_retries: u32, max_deliveries: u32) -> Arc<DeliveryPipeline> {
    Arc::new(DeliveryPipeline::from_services(
        &mem.services(),
        &policy(max_retries, max_deliveries),
        SALT,
    ))
}

pub fn consumer(mem: &InMemoryServices, name: &str) -> Arc<StreamConsumer> {
    Arc::new(StreamConsumer::new(mem.log.clone(), GROUP, name, 60_000))
}

pub fn stream_config(partition_count: u32, name: &str) -> StreamConfig {
    StreamConfig {
        partition_count,
        consumer_group: GROUP.to_string(),
        consumer_name: name.to_string(),
        batch_size: 4,
        block_ms: 20,
        max_in_flight: 8,
        backpressure_pause_ms: 5,
        lease_retry_ms: 10,
        ..StreamConfig::default()
    }
}

pub fn worker(
    mem: &InMemoryServices,
    partition: u32,
    consumer: Arc<StreamConsumer>,
    pipeline: Arc<DeliveryPipeline>,
    config: StreamConfig,
    shutdown: Arc<AtomicBool>,
) -> PartitionWorker {
    PartitionWorker::new(partition, consumer, pipeline, mem.leases.clone(), config, shutdown)
}

/// Take the partition lease, then dequeue and settle until the partition
/// yields nothing new
pub async fn drain(
    mem: &InMemoryServices,
    partition: u32,
    consumer: Arc<StreamConsumer>,
    pipeline: Arc<DeliveryPipeline>,
) -> BatchReport {
    consumer.ensure_group(partition).await.unwrap();
    assert!(mem.leases.acquire(partition, consumer.consumer_name()).await.unwrap());
    let worker = worker(
        mem,
        partition,
        consumer.clone(),
        pipeline,
        stream_config(1, consumer.consumer_name()),
        Arc::new(AtomicBool::new(false)),
    );

    let mut total = BatchReport::default();
    for _ in 0..1_000 {
        let entries = consumer.dequeue(partition, 4, 0).await.unwrap();
        if entries.is_empty() {
            break;
        }
        let report = worker.process_batch(entries).await;
        total.acknowledged += report.acknowledged;
        total.dead_lettered += report.dead_lettered;
        total.stalled += report.stalled;
        if report.stalled > 0 {
            break;
        }
    }
    total
}

pub async fn append_envelope(mem: &InMemoryServices, partition: u32, envelope: &MessageEnvelope) {
    mem.log
        .append(partition, &envelope.message_id, encode_envelope(envelope).unwrap())
        .await
        .unwrap();
}

pub fn envelope(conversation_id: &str, content: &str, recipients: &[&str]) -> MessageEnvelope {
    MessageEnvelope {
        message_id: uuid::Uuid::new_v4().to_string(),
        conversation_id: conversation_id.to_string(),
        sender_id: "alice".to_string(),
        created_at: chrono::Utc::now(),
        idempotency_key: uuid::Uuid::new_v4().simple().to_string(),
        correlation_id: "corr".to_string(),
        payload_key: None,
        metadata: courier_types::EnvelopeMetadata {
            content: content.to_string(),
            content_type: "text/plain".to_string(),
            priority: courier_types::Priority::Normal,
            retry_count: 0,
            recipient_ids: recipients.iter().map(|r| r.to_string()).collect(),
        },
    }
}

pub fn online(mem: &InMemoryServices, user_id: &str) -> SocketRef {
    let socket = SocketRef::new("gw-1", format!("conn-{}", user_id));
    mem.presence.connect(user_id, socket.clone());
    socket
}

pub async fn dequeue_one(consumer: &StreamConsumer, partition: u32) -> LogEntry {
    let mut entries = consumer.dequeue(partition, 1, 0).await.unwrap();
    assert_eq!(entries.len(), 1, "expected exactly one entry");
    entries.remove(0)
}

/// Poll `check` until it holds or the deadline passes
pub async fn eventually<F>(mut check: F)
where
    F: AsyncFnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}
