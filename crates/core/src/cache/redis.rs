//! Redis-backed SharedCache implementation.

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{CacheError, SharedCache};

/// Shared cache over a Redis connection manager. The manager reconnects
/// internally; individual operations carry the configured deadline.
#[derive(Clone)]
pub struct RedisCache {
    client: redis::Client,
    manager: ConnectionManager,
    op_deadline: Duration,
}

impl RedisCache {
    /// Connect to the cache backend.
    pub async fn connect(url: &str, op_deadline: Duration) -> Result<Self, CacheError> {
        let client =
            redis::Client::open(url).map_err(|e| CacheError::Backend(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(Self {
            client,
            manager,
            op_deadline,
        })
    }

    async fn with_deadline<T, F>(&self, op: F) -> Result<T, CacheError>
    where
        F: std::future::Future<Output = Result<T, redis::RedisError>>,
    {
        match tokio::time::timeout(self.op_deadline, op).await {
            Ok(result) => result.map_err(|e| CacheError::Backend(e.to_string())),
            Err(_) => Err(CacheError::Timeout),
        }
    }
}

#[async_trait]
impl SharedCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.manager.clone();
        self.with_deadline(conn.get::<_, Option<String>>(key)).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        let ttl_secs = ttl.as_secs().max(1);
        self.with_deadline(conn.set_ex::<_, _, ()>(key, value, ttl_secs))
            .await
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        self.with_deadline(conn.del::<_, ()>(key)).await
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        self.with_deadline(conn.publish::<_, _, ()>(channel, message))
            .await
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>, CacheError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        let channel = channel.to_string();
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                match msg.get_payload::<String>() {
                    Ok(payload) => {
                        if tx.send(payload).await.is_err() {
                            debug!(channel = %channel, "invalidation receiver dropped");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "bad pub/sub payload");
                    }
                }
            }
        });

        Ok(rx)
    }
}
