use super::{PresenceRegistry, SocketRef};
use anyhow::{Context, Result};
use async_trait::async_trait;
use courier_redis::RedisClient;
use serde_json::json;
use tracing::debug;

/// Presence in Redis:
/// - set `{presence_prefix}{user_id}` of socket refs
/// - emission publishes `{socketRef, payload}` to `{channel_prefix}{instance_id}`,
///   which the owning transport instance subscribes to
#[derive(Clone)]
pub struct RedisPresence {
    client: RedisClient,
    presence_prefix: String,
    channel_prefix: String,
}

impl RedisPresence {
    pub fn new(
        client: RedisClient,
        presence_prefix: impl Into<String>,
        channel_prefix: impl Into<String>,
    ) -> Self {
        Self {
            client,
            presence_prefix: presence_prefix.into(),
            channel_prefix: channel_prefix.into(),
        }
    }

    fn key(&self, user_id: &str) -> String {
        format!("{}{}", self.presence_prefix, user_id)
    }

    pub async fn register(&self, user_id: &str, socket: &SocketRef) -> Result<()> {
        let mut client = self.client.clone();
        client
            .sadd(&self.key(user_id), socket.to_string())
            .await
            .context("Failed to register socket")?;
        Ok(())
    }

    pub async fn unregister(&self, user_id: &str, socket: &SocketRef) -> Result<()> {
        let mut client = self.client.clone();
        client
            .srem(&self.key(user_id), socket.to_string())
            .await
            .context("Failed to unregister socket")?;
        Ok(())
    }
}

#[async_trait]
impl PresenceRegistry for RedisPresence {
    async fn connections(&self, user_id: &str) -> Result<Vec<SocketRef>> {
        let mut client = self.client.clone();
        let members = client
            .smembers(&self.key(user_id))
            .await
            .context("Failed to read presence set")?;

        Ok(members
            .iter()
            .filter_map(|m| match m.parse::<SocketRef>() {
                Ok(socket) => Some(socket),
                Err(_) => {
                    debug!(member = %m, "Skipping malformed socket ref in presence set");
                    None
                }
            })
            .collect())
    }

    async fn emit(&self, socket: &SocketRef, payload: &serde_json::Value) -> Result<bool> {
        let channel = format!("{}{}", self.channel_prefix, socket.instance_id);
        let message = json!({
            "socketRef": socket.to_string(),
            "payload": payload,
        })
        .to_string();

        let mut client = self.client.clone();
        let receivers = client
            .publish(&channel, message)
            .await
            .context("Failed to publish to transport instance")?;
        Ok(receivers > 0)
    }
}
