//! Prometheus metrics for courier
//!
//! The delivery core only emits into these; scraping happens through
//! `gather_metrics()` on each service's `/metrics` endpoint.
//! - Ingress throughput and idempotent-hit rate
//! - Per-stage throughput and latency
//! - Partition lag / pending gauges
//! - Dead-letter and retry rates

use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, TextEncoder, opts,
    register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge_vec,
};

// ============================================================================
// Ingress Metrics
// ============================================================================

/// Ingest calls by outcome (accepted, idempotent_hit, rejected)
pub static MESSAGES_INGESTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "courier_messages_ingested_total",
            "Total number of ingest calls by outcome"
        ),
        &["outcome"]
    )
    .expect("Failed to register MESSAGES_INGESTED_TOTAL metric")
});

/// Duplicates collapsed, by the layer that detected them
pub static IDEMPOTENT_HITS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "courier_idempotent_hits_total",
            "Duplicates collapsed into no-ops, by detecting layer"
        ),
        &["layer"]
    )
    .expect("Failed to register IDEMPOTENT_HITS_TOTAL metric")
});

// ============================================================================
// Pipeline Metrics
// ============================================================================

/// Stage executions by stage and outcome
pub static PIPELINE_STAGE_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "courier_pipeline_stage_total",
            "Pipeline stage executions by stage and outcome"
        ),
        &["stage", "outcome"]
    )
    .expect("Failed to register PIPELINE_STAGE_TOTAL metric")
});

/// Per-stage latency
pub static PIPELINE_STAGE_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "courier_pipeline_stage_duration_seconds",
        "Pipeline stage latency in seconds",
        &["stage"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register PIPELINE_STAGE_DURATION_SECONDS metric")
});

/// Retries scheduled, by failing stage
pub static RETRIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("courier_retries_total", "Retries scheduled by failing stage"),
        &["stage"]
    )
    .expect("Failed to register RETRIES_TOTAL metric")
});

/// Dead-lettered entries by reason
pub static DEAD_LETTER_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "courier_dead_letter_total",
            "Entries written to the dead-letter sink by reason"
        ),
        &["reason"]
    )
    .expect("Failed to register DEAD_LETTER_TOTAL metric")
});

// ============================================================================
// Consumer Metrics
// ============================================================================

/// Unacknowledged entries (undelivered + pending) per partition
pub static PARTITION_LAG: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        opts!(
            "courier_partition_lag",
            "Unacknowledged entries per partition"
        ),
        &["partition"]
    )
    .expect("Failed to register PARTITION_LAG metric")
});

/// Delivered-but-unacknowledged entries per partition
pub static PARTITION_PENDING: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        opts!(
            "courier_partition_pending",
            "Delivered but unacknowledged entries per partition"
        ),
        &["partition"]
    )
    .expect("Failed to register PARTITION_PENDING metric")
});

/// Entries reclaimed from idle consumers
pub static RECLAIMED_ENTRIES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "courier_reclaimed_entries_total",
        "Pending entries reclaimed from idle consumers"
    ))
    .expect("Failed to register RECLAIMED_ENTRIES_TOTAL metric")
});

/// Reads skipped because the in-flight bound was reached
pub static BACKPRESSURE_PAUSES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "courier_backpressure_pauses_total",
        "Reads paused because too many entries were in flight"
    ))
    .expect("Failed to register BACKPRESSURE_PAUSES_TOTAL metric")
});

// ============================================================================
// Metrics Collection
// ============================================================================

/// Gather all registered metrics and encode as Prometheus text format
pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}
