// ============================================================================
// Consumer Recovery Tests
// ============================================================================
//
// Crash mid-batch, lease handover between workers, backpressure, shutdown.
//
// ============================================================================

mod test_utils;

use courier_config::{DeliveryPolicy, StreamConfig};
use courier_shared::lease::LeaseManager;
use courier_shared::{DeliveryPipeline, InMemoryServices};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use test_utils::{
    SALT, consumer, drain, eventually, online, pipeline, producer, send_request, stream_config, worker,
};

async fn ingest_all(mem: &InMemoryServices, contents: &[&str]) {
    let producer = producer(mem, 1);
    for content in contents {
        producer
            .ingest(send_request("conv_1", "alice", content, Some(content), &["bob"]))
            .await
            .unwrap();
    }
}

/// Every attempt fails on bob's presence lookup, so one entry spends
/// `(attempts - 1) * delay_ms` in backoff before it is dead-lettered
fn slow_pipeline(mem: &InMemoryServices, attempts: u32, delay_ms: u64) -> Arc<DeliveryPipeline> {
    online(mem, "bob");
    mem.presence.fail_lookups_for("bob");
    let policy = DeliveryPolicy {
        max_retries: attempts,
        retry_base_delay_ms: delay_ms,
        retry_max_delay_ms: delay_ms,
        max_deliveries: 10,
        ..DeliveryPolicy::default()
    };
    Arc::new(DeliveryPipeline::from_services(&mem.services(), &policy, SALT))
}

fn short_lease_config(name: &str, lease_ttl_ms: u64) -> StreamConfig {
    StreamConfig {
        lease_ttl_ms,
        ..stream_config(1, name)
    }
}

#[tokio::test]
async fn test_killed_consumer_work_is_finished_in_order_once() {
    let mem = InMemoryServices::new();
    ingest_all(&mem, &["a", "b", "c", "d", "e", "f"]).await;
    let p = pipeline(&mem, 3, 10);

    // c1 takes four, settles two, then dies
    let c1 = consumer(&mem, "c1");
    c1.ensure_group(0).await.unwrap();
    let batch = c1.dequeue(0, 4, 0).await.unwrap();
    assert_eq!(batch.len(), 4);
    for entry in &batch[..2] {
        p.process(entry).await.unwrap();
        c1.acknowledge(0, &[entry.offset]).await.unwrap();
    }
    drop(c1);

    mem.log.age_pending(0, Duration::from_secs(120));
    let c2 = consumer(&mem, "c2");
    let report = drain(&mem, 0, c2.clone(), p).await;
    assert_eq!(report.acknowledged, 4);

    assert_eq!(mem.store.persisted_contents(), vec!["a", "b", "c", "d", "e", "f"]);
    assert_eq!(c2.partition_lag(0).await.unwrap(), 0);
    assert!(mem.log.pending_owners(0, test_utils::GROUP).is_empty());
}

#[tokio::test]
async fn test_fresh_pending_entries_are_not_stolen() {
    let mem = InMemoryServices::new();
    ingest_all(&mem, &["a", "b"]).await;

    let c1 = consumer(&mem, "c1");
    c1.ensure_group(0).await.unwrap();
    let held = c1.dequeue(0, 1, 0).await.unwrap();

    // c1 is alive and within the reclaim threshold: c2 only sees "b"
    let c2 = consumer(&mem, "c2");
    let entries = c2.dequeue(0, 10, 0).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].reclaimed);
    assert_eq!(entries[0].envelope().unwrap().metadata.content, "b");

    let owners = mem.log.pending_owners(0, test_utils::GROUP);
    assert_eq!(owners[0], (held[0].offset, "c1".to_string()));
}

#[tokio::test]
async fn test_worker_runs_until_shutdown_and_releases_lease() {
    let mem = InMemoryServices::new();
    let shutdown = Arc::new(AtomicBool::new(false));
    let c = consumer(&mem, "w1");
    let handle = tokio::spawn(
        worker(&mem, 0, c.clone(), pipeline(&mem, 3, 10), stream_config(1, "w1"), shutdown.clone()).run(),
    );

    ingest_all(&mem, &["a", "b", "c"]).await;
    eventually(async || mem.store.message_count() == 3).await;
    eventually(async || c.partition_lag(0).await.unwrap() == 0).await;
    assert_eq!(mem.leases.owner(0).as_deref(), Some("w1"));

    shutdown.store(true, Ordering::SeqCst);
    handle.await.unwrap().unwrap();

    assert_eq!(mem.store.persisted_contents(), vec!["a", "b", "c"]);
    assert_eq!(mem.leases.owner(0), None);
}

#[tokio::test]
async fn test_only_lease_owner_consumes_and_hands_over() {
    let mem = InMemoryServices::new();
    let p = pipeline(&mem, 3, 10);

    let stop_w1 = Arc::new(AtomicBool::new(false));
    let stop_w2 = Arc::new(AtomicBool::new(false));
    let w1 = tokio::spawn(
        worker(&mem, 0, consumer(&mem, "w1"), p.clone(), stream_config(1, "w1"), stop_w1.clone()).run(),
    );
    eventually(async || mem.leases.owner(0).as_deref() == Some("w1")).await;
    let w2 = tokio::spawn(
        worker(&mem, 0, consumer(&mem, "w2"), p.clone(), stream_config(1, "w2"), stop_w2.clone()).run(),
    );

    ingest_all(&mem, &["a", "b", "c"]).await;
    eventually(async || mem.store.message_count() == 3).await;
    let owners: Vec<_> = mem.log.pending_owners(0, test_utils::GROUP);
    assert!(owners.iter().all(|(_, owner)| owner == "w1"));

    stop_w1.store(true, Ordering::SeqCst);
    w1.await.unwrap().unwrap();
    eventually(async || mem.leases.owner(0).as_deref() == Some("w2")).await;

    ingest_all(&mem, &["d", "e"]).await;
    eventually(async || mem.store.message_count() == 5).await;

    stop_w2.store(true, Ordering::SeqCst);
    w2.await.unwrap().unwrap();
    assert_eq!(mem.store.persisted_contents(), vec!["a", "b", "c", "d", "e"]);
}

#[tokio::test]
async fn test_takeover_after_crash_preserves_order() {
    let mem = InMemoryServices::new();
    ingest_all(&mem, &["a", "b", "c", "d", "e"]).await;

    // w1 owned the partition, took three entries and crashed
    let crashed = consumer(&mem, "w1");
    crashed.ensure_group(0).await.unwrap();
    assert!(mem.leases.acquire(0, "w1").await.unwrap());
    assert_eq!(crashed.dequeue(0, 3, 0).await.unwrap().len(), 3);
    drop(crashed);
    mem.leases.expire(0);

    let shutdown = Arc::new(AtomicBool::new(false));
    let c = consumer(&mem, "w2");
    let handle = tokio::spawn(
        worker(&mem, 0, c.clone(), pipeline(&mem, 3, 10), stream_config(1, "w2"), shutdown.clone()).run(),
    );

    // no waiting for the reclaim threshold: the new owner recovers at once
    eventually(async || mem.store.message_count() == 5).await;
    shutdown.store(true, Ordering::SeqCst);
    handle.await.unwrap().unwrap();

    assert_eq!(mem.store.persisted_contents(), vec!["a", "b", "c", "d", "e"]);
    assert_eq!(c.partition_lag(0).await.unwrap(), 0);
}

#[tokio::test]
async fn test_backpressure_drains_pending_backlog_first() {
    let mem = InMemoryServices::new();
    let contents: Vec<String> = (0..12).map(|i| format!("m{:02}", i)).collect();
    let refs: Vec<&str> = contents.iter().map(String::as_str).collect();
    ingest_all(&mem, &refs).await;

    // eight entries stuck with a consumer that never acknowledges: the
    // group is at its in-flight limit
    let ghost = consumer(&mem, "ghost");
    ghost.ensure_group(0).await.unwrap();
    assert_eq!(ghost.dequeue(0, 8, 0).await.unwrap().len(), 8);
    assert_eq!(ghost.pending(0).await.unwrap(), 8);

    let shutdown = Arc::new(AtomicBool::new(false));
    let c = consumer(&mem, "w1");
    let handle = tokio::spawn(
        worker(&mem, 0, c.clone(), pipeline(&mem, 3, 10), stream_config(1, "w1"), shutdown.clone()).run(),
    );

    eventually(async || mem.store.message_count() == 12).await;
    eventually(async || c.partition_lag(0).await.unwrap() == 0).await;
    shutdown.store(true, Ordering::SeqCst);
    handle.await.unwrap().unwrap();

    assert_eq!(mem.store.persisted_contents(), contents);
}

#[tokio::test]
async fn test_entries_outliving_lease_ttl_are_processed_once() {
    let mem = InMemoryServices::with_lease_ttl(Duration::from_millis(50));
    ingest_all(&mem, &["a", "b"]).await;
    // each entry takes ~120ms, more than twice the lease TTL
    let p = slow_pipeline(&mem, 4, 40);

    let stop_w1 = Arc::new(AtomicBool::new(false));
    let stop_w2 = Arc::new(AtomicBool::new(false));
    let w1 = tokio::spawn(
        worker(&mem, 0, consumer(&mem, "w1"), p.clone(), short_lease_config("w1", 50), stop_w1.clone()).run(),
    );
    eventually(async || mem.leases.owner(0).as_deref() == Some("w1")).await;
    let w2 = tokio::spawn(
        worker(&mem, 0, consumer(&mem, "w2"), p.clone(), short_lease_config("w2", 50), stop_w2.clone()).run(),
    );

    eventually(async || mem.dead_letter.records().len() == 2).await;
    // time for a second owner to redo the work, if it could
    tokio::time::sleep(Duration::from_millis(300)).await;

    let records = mem.dead_letter.records();
    assert_eq!(records.len(), 2);
    let offsets: HashSet<_> = records.iter().map(|r| r.offset.clone()).collect();
    assert_eq!(offsets.len(), 2);

    stop_w1.store(true, Ordering::SeqCst);
    stop_w2.store(true, Ordering::SeqCst);
    w1.await.unwrap().unwrap();
    w2.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_lost_lease_stops_batch_and_leaves_entries_pending() {
    let mem = InMemoryServices::with_lease_ttl(Duration::from_millis(50));
    ingest_all(&mem, &["a", "b", "c"]).await;
    // each entry takes ~300ms of backoff
    let p = slow_pipeline(&mem, 4, 100);

    let shutdown = Arc::new(AtomicBool::new(false));
    let c = consumer(&mem, "w1");
    let handle = tokio::spawn(
        worker(&mem, 0, c.clone(), p, short_lease_config("w1", 50), shutdown.clone()).run(),
    );
    eventually(async || mem.leases.owner(0).as_deref() == Some("w1")).await;
    eventually(async || mem.log.pending_owners(0, test_utils::GROUP).len() == 3).await;

    // someone else takes the partition while "a" is still retrying
    mem.leases.expire(0);
    assert!(mem.leases.acquire(0, "intruder").await.unwrap());
    let stop_keeper = Arc::new(AtomicBool::new(false));
    let keeper = {
        let leases = mem.leases.clone();
        let stop = stop_keeper.clone();
        tokio::spawn(async move {
            while !stop.load(Ordering::SeqCst) {
                assert!(leases.renew(0, "intruder").await.unwrap());
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
    };

    tokio::time::sleep(Duration::from_millis(600)).await;

    // "a" was dropped mid-retry; nothing was dead-lettered or acknowledged
    assert!(mem.dead_letter.records().is_empty());
    let owners = mem.log.pending_owners(0, test_utils::GROUP);
    assert_eq!(owners.len(), 3);
    assert!(owners.iter().all(|(_, owner)| owner == "w1"));
    assert_eq!(mem.leases.owner(0).as_deref(), Some("intruder"));

    shutdown.store(true, Ordering::SeqCst);
    handle.await.unwrap().unwrap();
    stop_keeper.store(true, Ordering::SeqCst);
    keeper.await.unwrap();
}
