use super::MessageStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use courier_config::DbConfig;
use courier_types::{MessageEnvelope, ReceiptState};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;

/// Database connection pool type
pub type DbPool = Pool<Postgres>;

/// SQLSTATE for unique_violation
const UNIQUE_VIOLATION: &str = "23505";

/// Create a PostgreSQL connection pool
pub async fn create_pool(database_url: &str, db_config: &DbConfig) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(db_config.max_connections)
        .acquire_timeout(Duration::from_secs(db_config.acquire_timeout_secs))
        .idle_timeout(Some(Duration::from_secs(db_config.idle_timeout_secs)))
        .test_before_acquire(true)
        .connect(database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    Ok(pool)
}

pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to run database migrations")?;
    Ok(())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}

/// Postgres message store.
///
/// Inserts use `ON CONFLICT DO NOTHING`; a unique violation that still
/// surfaces (e.g. from a concurrent transaction) is read as "already there".
#[derive(Clone)]
pub struct PgMessageStore {
    pool: DbPool,
}

impl PgMessageStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn insert_if_absent(&self, envelope: &MessageEnvelope) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO messages (
                message_id, idempotency_key, conversation_id, sender_id,
                content, content_type, priority, payload_key, correlation_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&envelope.message_id)
        .bind(&envelope.idempotency_key)
        .bind(&envelope.conversation_id)
        .bind(&envelope.sender_id)
        .bind(&envelope.metadata.content)
        .bind(&envelope.metadata.content_type)
        .bind(envelope.metadata.priority.as_str())
        .bind(envelope.payload_key.as_deref())
        .bind(&envelope.correlation_id)
        .bind(envelope.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.rows_affected() == 1),
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(e).context("Failed to insert message"),
        }
    }

    async fn record_receipt(&self, message_id: &str, recipient_id: &str, state: ReceiptState) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO delivery_receipts (message_id, recipient_id, state)
            VALUES ($1, $2, $3)
            ON CONFLICT (message_id, recipient_id, state) DO NOTHING
            "#,
        )
        .bind(message_id)
        .bind(recipient_id)
        .bind(state.as_str())
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.rows_affected() == 1),
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(e).context("Failed to record delivery receipt"),
        }
    }
}
