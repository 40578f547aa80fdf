//! In-memory SharedCache implementation.
//!
//! Serves tests and single-process development setups. TTLs are honored;
//! pub/sub fans out to all live subscribers of a channel.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};

use super::{CacheError, SharedCache};

#[derive(Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// Process-local cache with the same semantics as the Redis-backed one.
#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<String>>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl SharedCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.entries.lock().await.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), CacheError> {
        let mut subscribers = self.subscribers.lock().await;
        if let Some(senders) = subscribers.get_mut(channel) {
            senders.retain(|tx| tx.try_send(message.to_string()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>, CacheError> {
        let (tx, rx) = mpsc::channel(64);
        self.subscribers
            .lock()
            .await
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_del() {
        let cache = InMemoryCache::new();
        cache
            .set_ex("slug:vpc", "1", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("slug:vpc").await.unwrap(), Some("1".to_string()));

        cache.del("slug:vpc").await.unwrap();
        assert_eq!(cache.get("slug:vpc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = InMemoryCache::new();
        cache
            .set_ex("k", "v", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pubsub_fanout() {
        let cache = InMemoryCache::new();
        let mut rx1 = cache.subscribe("ch").await.unwrap();
        let mut rx2 = cache.subscribe("ch").await.unwrap();

        cache.publish("ch", "hello").await.unwrap();
        assert_eq!(rx1.recv().await.unwrap(), "hello");
        assert_eq!(rx2.recv().await.unwrap(), "hello");
    }
}
