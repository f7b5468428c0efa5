// ============================================================================
// Delivery Worker
// ============================================================================
//
// Consumes the partitioned message log and drives every entry through the
// delivery pipeline (persist → fanout → push), acknowledging entries in
// offset order.
//
// One task per partition. A partition is only read by the instance holding
// its lease, so at most one consumer applies a conversation's messages at a
// time; any instance can take a partition over once the lease expires.
//
// Each partition task owns a dedicated Redis connection: XREADGROUP BLOCK
// would otherwise stall every other command multiplexed on the shared one.
//
// Shutdown (SIGTERM/Ctrl-C): workers finish and acknowledge the batch in
// hand, release their leases and exit. Unfinished entries stay pending and
// are reclaimed by the next owner.
//
// ============================================================================

use anyhow::{Context, Result};
use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use courier_config::Config;
use courier_redis::RedisClient;
use courier_shared::log::RedisStreamLog;
use courier_shared::store::{DbPool, PgMessageStore, create_pool, run_migrations};
use courier_shared::{
    DeliveryPipeline, DeliveryServices, PartitionWorker, StreamConsumer, metrics_handler, shutdown_signal,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone)]
struct HealthState {
    redis: RedisClient,
    db_pool: DbPool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Arc::new(Config::from_env()?);

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.rust_log.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("=== Delivery Worker Starting ===");
    info!("Partitions: {}", config.stream.partition_count);
    info!("Consumer group: {}", config.stream.consumer_group);
    info!("Consumer name: {}", config.stream.consumer_name);

    info!("Connecting to Redis at: {}", config.redis_url_safe());
    let redis = RedisClient::connect(&config.redis_url)
        .await
        .context("Failed to connect to Redis")?;
    info!("Connected to Redis");

    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL is required by the delivery worker")?;
    info!("Connecting to database...");
    let db_pool = create_pool(database_url, &config.db).await?;
    run_migrations(&db_pool).await?;
    info!("Database ready");

    let services = DeliveryServices::redis(
        &config,
        redis.clone(),
        Arc::new(PgMessageStore::new(db_pool.clone())),
    );
    let pipeline = Arc::new(DeliveryPipeline::from_services(
        &services,
        &config.delivery,
        &config.logging.hash_salt,
    ));

    // Set on SIGTERM/Ctrl-C
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_flag.store(true, Ordering::SeqCst);
    });

    let mut workers = Vec::with_capacity(config.stream.partition_count as usize);
    for partition in 0..config.stream.partition_count {
        let connection = RedisClient::connect(&config.redis_url)
            .await
            .with_context(|| format!("Failed to open Redis connection for partition {}", partition))?;
        let log = Arc::new(RedisStreamLog::new(
            connection,
            config.stream.key_prefix.clone(),
            config.stream.max_len,
        ));
        let consumer = Arc::new(StreamConsumer::new(
            log,
            config.stream.consumer_group.clone(),
            config.stream.consumer_name.clone(),
            config.stream.reclaim_idle_ms,
        ));
        let worker = PartitionWorker::new(
            partition,
            consumer,
            pipeline.clone(),
            services.leases.clone(),
            config.stream.clone(),
            shutdown.clone(),
        );
        workers.push((partition, tokio::spawn(worker.run())));
    }
    info!("Started {} partition workers", workers.len());

    let health = tokio::spawn(serve_health(
        config.health_port,
        HealthState {
            redis,
            db_pool,
        },
    ));

    for (partition, handle) in workers {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(partition = partition, error = %e, "Partition worker failed"),
            Err(e) => error!(partition = partition, error = %e, "Partition worker panicked"),
        }
    }

    health.abort();
    info!("Delivery worker stopped gracefully");
    Ok(())
}

async fn serve_health(port: u16, state: HealthState) {
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(liveness))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!(error = %e, addr = %addr, "Failed to bind health endpoint");
            return;
        }
    };
    info!("Health and metrics listening on {}", addr);
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "Health server failed");
    }
}

async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

/// Ready when both Redis and Postgres answer
async fn health_check(State(mut state): State<HealthState>) -> impl IntoResponse {
    let redis_ok = state.redis.ping().await.is_ok();
    let db_ok = sqlx::query("SELECT 1").execute(&state.db_pool).await.is_ok();

    let status = if redis_ok && db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if status == StatusCode::OK { "ok" } else { "degraded" },
            "redis": redis_ok,
            "database": db_ok,
        })),
    )
}
