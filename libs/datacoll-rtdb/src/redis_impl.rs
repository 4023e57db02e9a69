//! Redis-backed store implementation
//!
//! Pooled connections (bb8) for commands; each subscription gets its own
//! pub/sub connection with a forwarding task, torn down when the
//! [`Subscription`] handle drops.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use futures::StreamExt;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::traits::{BusMessage, Rtdb, Subscription};

/// Redis realtime store client
pub struct RedisRtdb {
    pool: Pool<RedisConnectionManager>,
    client: redis::Client,
    url: String,
}

impl std::fmt::Debug for RedisRtdb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRtdb").field("url", &self.url).finish()
    }
}

impl RedisRtdb {
    /// Connect and verify the server with a PING
    pub async fn connect(url: &str) -> Result<Self> {
        let manager = RedisConnectionManager::new(url)
            .context("failed to create Redis connection manager")?;
        let pool = Pool::builder()
            .max_size(16)
            .build(manager)
            .await
            .context("failed to build Redis connection pool")?;

        {
            let mut conn = pool.get().await.context("failed to get Redis connection")?;
            let _: String = redis::cmd("PING")
                .query_async(&mut *conn)
                .await
                .context("failed to ping Redis server")?;
        }

        let client = redis::Client::open(url).context("invalid Redis URL")?;

        Ok(Self {
            pool,
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl Rtdb for RedisRtdb {
    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        Ok(conn.exists(key).await?)
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.pool.get().await?;
        Ok(conn.del(keys).await?)
    }

    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.pool.get().await?;
        let mut iter: redis::AsyncIter<String> = conn.scan_match(pattern).await?;
        let mut keys = Vec::new();
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.hset(key, field, value).await?;
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.pool.get().await?;
        Ok(conn.hget(key, field).await?)
    }

    async fn hash_set_multi(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.get().await?;
        let _: () = conn.hset_multiple(key, fields).await?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.pool.get().await?;
        Ok(conn.hgetall(key).await?)
    }

    async fn list_rpush(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.rpush(key, value).await?;
        Ok(())
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let mut conn = self.pool.get().await?;
        Ok(conn.lrange(key, start, stop).await?)
    }

    async fn list_index(&self, key: &str, index: isize) -> Result<Option<String>> {
        let mut conn = self.pool.get().await?;
        Ok(conn.lindex(key, index).await?)
    }

    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.ltrim(key, start, stop).await?;
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let added: i64 = conn.sadd(key, member).await?;
        Ok(added > 0)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let removed: i64 = conn.srem(key, member).await?;
        Ok(removed > 0)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.pool.get().await?;
        Ok(conn.smembers(key).await?)
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<u32> {
        let mut conn = self.pool.get().await?;
        let reached: u32 = conn.publish(channel, message).await?;
        Ok(reached)
    }

    async fn subscribe(&self, channels: &[String]) -> Result<Subscription> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .context("failed to open pub/sub connection")?;
        for channel in channels {
            pubsub
                .subscribe(channel)
                .await
                .with_context(|| format!("failed to subscribe {channel}"))?;
        }

        let (tx, rx) = mpsc::channel(256);
        let task = tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                let channel = msg.get_channel_name().to_string();
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("dropping non-utf8 bus message on {channel}: {e}");
                        continue;
                    },
                };
                if tx.send(BusMessage { channel, payload }).await.is_err() {
                    debug!("bus subscriber gone, stopping forwarder");
                    break;
                }
            }
        });

        Ok(Subscription::new(rx, Some(task)))
    }
}
