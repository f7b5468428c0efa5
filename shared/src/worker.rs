// ============================================================================
// Partition Worker
// ============================================================================
//
// One task per partition. Loop:
//
//   1. hold the partition lease (acquire, or renew; stop reading on loss)
//   2. backpressure: budget = min(batch_size, max_in_flight - pending);
//      at 0, pause new reads and only drain the pending backlog
//   3. dequeue (reclaim stale entries first, then block for new ones)
//   4. process entries in offset order, acknowledging each one after its
//      pipeline finished or it was dead-lettered
//
// While a batch runs the lease is renewed every lease_ttl/3. If a renewal
// fails the batch is dropped where it stands: the in-flight entry and
// everything after it stay pending for the next owner.
//
// Shutdown: the flag is checked between batches only. A batch that has
// started is finished and acknowledged, then the lease is released.
//
// ============================================================================

use crate::consumer::{LogEntry, StreamConsumer};
use crate::lease::LeaseManager;
use crate::pipeline::{DeliveryPipeline, Disposition, PipelineState};
use anyhow::Result;
use courier_config::StreamConfig;
use courier_metrics::{BACKPRESSURE_PAUSES_TOTAL, PIPELINE_STAGE_TOTAL};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct PartitionWorker {
    partition: u32,
    consumer: Arc<StreamConsumer>,
    pipeline: Arc<DeliveryPipeline>,
    leases: Arc<dyn LeaseManager>,
    config: StreamConfig,
    shutdown: Arc<AtomicBool>,
}

/// Result of handling one dequeued batch
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub acknowledged: usize,
    pub dead_lettered: usize,
    /// Left unacknowledged for recovery
    pub stalled: usize,
    /// The partition lease could not be renewed mid-batch
    pub lease_lost: bool,
}

impl PartitionWorker {
    pub fn new(
        partition: u32,
        consumer: Arc<StreamConsumer>,
        pipeline: Arc<DeliveryPipeline>,
        leases: Arc<dyn LeaseManager>,
        config: StreamConfig,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            partition,
            consumer,
            pipeline,
            leases,
            config,
            shutdown,
        }
    }

    pub async fn run(self) -> Result<()> {
        let partition = self.partition;
        let owner = self.consumer.consumer_name().to_string();
        let retry_delay = Duration::from_millis(self.config.lease_retry_ms);

        while !self.shutdown.load(Ordering::SeqCst) {
            match self.consumer.ensure_group(partition).await {
                Ok(()) => break,
                Err(e) => {
                    warn!(partition = partition, error = %e, "Failed to create consumer group, retrying");
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }

        let mut holding = false;
        while !self.shutdown.load(Ordering::SeqCst) {
            match self.hold_lease(holding, &owner).await {
                Some(true) => holding = true,
                Some(false) | None => {
                    holding = false;
                    tokio::time::sleep(retry_delay).await;
                    continue;
                }
            }

            let mut budget = match self.read_budget().await {
                Ok(budget) => budget,
                Err(e) => {
                    warn!(partition = partition, error = %e, "Failed to measure pending entries");
                    tokio::time::sleep(retry_delay).await;
                    continue;
                }
            };
            if budget == 0 {
                // No new reads until the pending backlog is claimed and settled
                BACKPRESSURE_PAUSES_TOTAL.inc();
                debug!(partition = partition, "In-flight limit reached, pausing new reads");
                self.consumer.begin_recovery(partition);
                tokio::time::sleep(Duration::from_millis(self.config.backpressure_pause_ms)).await;
                budget = self.config.batch_size;
            }

            let entries = match self
                .consumer
                .dequeue(partition, budget, self.config.block_ms)
                .await
            {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(partition = partition, error = %e, "Dequeue failed");
                    tokio::time::sleep(retry_delay).await;
                    continue;
                }
            };
            if !entries.is_empty() {
                let report = self.process_batch(entries).await;
                if report.lease_lost {
                    holding = false;
                    tokio::time::sleep(retry_delay).await;
                    continue;
                }
                if report.stalled > 0 {
                    tokio::time::sleep(retry_delay).await;
                }
            }

            if let Err(e) = self.consumer.partition_lag(partition).await {
                debug!(partition = partition, error = %e, "Failed to refresh partition lag");
            }
        }

        if holding {
            match self.leases.release(partition, &owner).await {
                Ok(_) => info!(partition = partition, "Released partition lease"),
                Err(e) => warn!(partition = partition, error = %e, "Failed to release partition lease"),
            }
        }
        self.consumer.release_partition(partition);
        info!(partition = partition, "Partition worker stopped");
        Ok(())
    }

    /// `Some(true)` while owning the partition, `Some(false)` when another
    /// worker owns it, `None` when the lease store is unreachable
    async fn hold_lease(&self, holding: bool, owner: &str) -> Option<bool> {
        let partition = self.partition;
        let result = if holding {
            self.leases.renew(partition, owner).await
        } else {
            self.leases.acquire(partition, owner).await
        };

        match result {
            Ok(true) => {
                if !holding {
                    info!(partition = partition, owner = %owner, "Acquired partition lease");
                    // Whatever is pending belongs to a previous owner
                    self.consumer.begin_recovery(partition);
                }
                Some(true)
            }
            Ok(false) => {
                if holding {
                    warn!(partition = partition, "Partition lease lost, stopping reads");
                    self.consumer.release_partition(partition);
                }
                Some(false)
            }
            Err(e) => {
                warn!(partition = partition, error = %e, "Lease store unavailable");
                if holding {
                    self.consumer.release_partition(partition);
                }
                None
            }
        }
    }

    async fn read_budget(&self) -> Result<usize> {
        let pending = self.consumer.pending(self.partition).await? as usize;
        let in_flight_room = self.config.max_in_flight.saturating_sub(pending);
        Ok(self.config.batch_size.min(in_flight_room))
    }

    /// Settles a batch while holding the partition lease. The lease is
    /// renewed in the background; losing it cancels the batch, leaves every
    /// unacknowledged entry pending and releases the partition.
    pub async fn process_batch(&self, entries: Vec<LogEntry>) -> BatchReport {
        let partition = self.partition;
        let owner = self.consumer.consumer_name().to_string();
        let total = entries.len();
        let mut report = BatchReport::default();

        let lease_lost = tokio::select! {
            biased;
            () = self.settle_batch(&entries, &mut report) => false,
            () = self.keep_lease(&owner) => true,
        };

        if lease_lost {
            warn!(
                partition = partition,
                acknowledged = report.acknowledged,
                "Partition lease lost mid-batch, leaving the rest pending"
            );
            report.stalled = total - report.acknowledged;
            report.lease_lost = true;
            self.consumer.release_partition(partition);
        }
        report
    }

    /// Returns only once the lease could not be renewed
    async fn keep_lease(&self, owner: &str) {
        let period = Duration::from_millis((self.config.lease_ttl_ms / 3).max(1));
        loop {
            tokio::time::sleep(period).await;
            match self.leases.renew(self.partition, owner).await {
                Ok(true) => {}
                Ok(false) => return,
                Err(e) => {
                    warn!(partition = self.partition, error = %e, "Lease renewal failed");
                    return;
                }
            }
        }
    }

    /// Entries are handled strictly in order; the first one that cannot be
    /// settled stops the batch so nothing after it is acknowledged
    async fn settle_batch(&self, entries: &[LogEntry], report: &mut BatchReport) {
        let partition = self.partition;
        let total = entries.len();

        for (index, entry) in entries.iter().enumerate() {
            let disposition = match self.pipeline.process(entry).await {
                Ok(disposition) => disposition,
                Err(e) => {
                    error!(
                        partition = partition,
                        offset = %entry.offset,
                        error = %e,
                        "Entry could not be settled, leaving it pending"
                    );
                    report.stalled = total - index;
                    self.consumer.abandon(partition);
                    return;
                }
            };

            if let Err(e) = self.consumer.acknowledge(partition, &[entry.offset]).await {
                PIPELINE_STAGE_TOTAL.with_label_values(&["ack", "error"]).inc();
                warn!(partition = partition, offset = %entry.offset, error = %e, "Acknowledge failed");
                report.stalled = total - index;
                self.consumer.abandon(partition);
                return;
            }
            PIPELINE_STAGE_TOTAL.with_label_values(&["ack", "ok"]).inc();

            if matches!(disposition, Disposition::DeadLettered { .. }) {
                report.dead_lettered += 1;
            }
            report.acknowledged += 1;
            debug!(
                partition = partition,
                offset = %entry.offset,
                from = %disposition.state(),
                to = %PipelineState::Acknowledged,
                "Entry acknowledged"
            );
        }
    }
}
