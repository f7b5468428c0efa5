// ============================================================================
// Messaging Service
// ============================================================================
//
// HTTP ingress for new messages:
//
//   POST /api/v1/messages   SendRequest → 202 Acknowledgment
//
// The handler only reserves the idempotency key and appends the envelope to
// the conversation's partition; persistence and fanout happen in the
// delivery worker. A retried request with the same clientMessageId gets the
// original messageId back with `idempotentHit = true`.
//
// ============================================================================

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use courier_config::Config;
use courier_error::{AppError, AppResult};
use courier_redis::RedisClient;
use courier_shared::idempotency::RedisIdempotencyStore;
use courier_shared::log::RedisStreamLog;
use courier_shared::{MessageProducer, metrics_handler, shutdown_signal};
use courier_shared::utils::log_safe_id;
use courier_types::SendRequest;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set by the authenticating gateway in front of this service
const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
struct AppContext {
    producer: Arc<MessageProducer>,
    redis: RedisClient,
    config: Arc<Config>,
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

    info!("=== Messaging Service Starting ===");
    info!("Port: {}", config.port);
    info!("Partitions: {}", config.stream.partition_count);

    info!("Connecting to Redis at: {}", config.redis_url_safe());
    let redis = RedisClient::connect(&config.redis_url)
        .await
        .context("Failed to connect to Redis")?;
    info!("Connected to Redis");

    let log = Arc::new(RedisStreamLog::new(
        redis.clone(),
        config.stream.key_prefix.clone(),
        config.stream.max_len,
    ));
    let idempotency = Arc::new(RedisIdempotencyStore::new(
        redis.clone(),
        config.redis_key_prefixes.idempotency.clone(),
        config.delivery.idempotency_ttl_secs,
    ));
    let producer = Arc::new(MessageProducer::new(
        log,
        idempotency,
        config.stream.partition_count,
        config.ingress.clone(),
        &config.logging.hash_salt,
    ));

    let context = AppContext {
        producer,
        redis,
        config: config.clone(),
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(liveness))
        .route("/metrics", get(metrics_handler))
        .route("/api/v1/messages", post(send_message))
        .layer(TraceLayer::new_for_http())
        .with_state(context);

    let bind_address = format!("0.0.0.0:{}", config.port);
    info!("Messaging Service listening on {}", bind_address);
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Failed to start server")?;

    info!("Messaging Service stopped");
    Ok(())
}

/// POST /api/v1/messages
async fn send_message(
    State(context): State<AppContext>,
    headers: HeaderMap,
    Json(request): Json<SendRequest>,
) -> AppResult<impl IntoResponse> {
    if let Some(user_id) = headers.get(USER_ID_HEADER) {
        let user_id = user_id
            .to_str()
            .map_err(|_| AppError::validation("x-user-id header is not valid UTF-8"))?;
        if user_id != request.sender_id {
            warn!(
                user_hash = %log_safe_id(user_id, &context.config.logging.hash_salt),
                "senderId does not match the authenticated user"
            );
            return Err(AppError::validation("senderId does not match the authenticated user"));
        }
    }

    let ack = context.producer.ingest(request).await?;
    Ok((StatusCode::ACCEPTED, Json(ack)))
}

async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

/// Ready when Redis answers; ingest cannot work without it
async fn health_check(State(mut context): State<AppContext>) -> impl IntoResponse {
    match context.redis.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "ok", "redis": true}))),
        Err(e) => {
            warn!(error = %e, "Health check: Redis unreachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "degraded", "redis": false})),
            )
        }
    }
}
