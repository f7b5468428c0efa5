use super::{IdempotencyRecord, IdempotencyStore, RecordState, Reservation};
use anyhow::{Context, Result};
use async_trait::async_trait;
use courier_redis::RedisClient;
use tracing::debug;

/// `SET {prefix}{key} <json record> NX EX ttl`
#[derive(Clone)]
pub struct RedisIdempotencyStore {
    client: RedisClient,
    key_prefix: String,
    ttl_secs: u64,
}

impl RedisIdempotencyStore {
    pub fn new(client: RedisClient, key_prefix: impl Into<String>, ttl_secs: u64) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
            ttl_secs,
        }
    }

    fn key(&self, idempotency_key: &str) -> String {
        format!("{}{}", self.key_prefix, idempotency_key)
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn reserve(&self, record: &IdempotencyRecord) -> Result<Reservation> {
        let key = self.key(&record.idempotency_key);
        let json = serde_json::to_string(record)?;
        let mut client = self.client.clone();

        // Two rounds: the existing record can expire between SET NX and GET
        for _ in 0..2 {
            if client
                .set_nx_ex(&key, json.as_str(), self.ttl_secs)
                .await
                .context("Failed to reserve idempotency key")?
            {
                return Ok(Reservation::Reserved);
            }

            let existing: Option<String> = client
                .get(&key)
                .await
                .context("Failed to read idempotency record")?;
            if let Some(existing) = existing {
                let record: IdempotencyRecord = serde_json::from_str(&existing)
                    .context("Corrupt idempotency record")?;
                return Ok(Reservation::Existing(record));
            }
            debug!("Idempotency record expired during reserve, retrying");
        }
        anyhow::bail!("idempotency key {} kept flapping during reserve", record.idempotency_key)
    }

    async fn promote(&self, record: &IdempotencyRecord) -> Result<()> {
        let mut accepted = record.clone();
        accepted.state = RecordState::Accepted;
        let json = serde_json::to_string(&accepted)?;
        let mut client = self.client.clone();
        client
            .set_xx_keepttl(&self.key(&record.idempotency_key), json.as_str())
            .await
            .context("Failed to promote idempotency record")?;
        Ok(())
    }

    async fn release(&self, idempotency_key: &str) -> Result<()> {
        let mut client = self.client.clone();
        client
            .del(self.key(idempotency_key))
            .await
            .context("Failed to release idempotency key")?;
        Ok(())
    }
}
