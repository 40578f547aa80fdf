//! Shared cache abstraction and the layered identity cache.
//!
//! Lookups go in-process map first, then the shared cache, then the
//! relational store, with write-through back up the stack. Invalidations
//! from CRUD writes elsewhere in the system arrive over the cache's
//! pub/sub channel.

mod identity;
mod memory;
mod redis;

pub use identity::{IdentityCache, IdentityCacheConfig};
pub use memory::InMemoryCache;
pub use redis::RedisCache;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Channel carrying cache invalidation events between processes.
pub const INVALIDATION_CHANNEL: &str = "factoryops:invalidate";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache operation timed out")]
    Timeout,
}

/// Narrow interface over the shared cache (Redis in production, an
/// in-memory map in tests). All values are strings; callers serialize.
#[async_trait]
pub trait SharedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
    async fn del(&self, key: &str) -> Result<(), CacheError>;
    async fn publish(&self, channel: &str, message: &str) -> Result<(), CacheError>;
    /// Subscribe to a pub/sub channel; messages arrive on the returned
    /// receiver until the subscription or the backend drops.
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>, CacheError>;
}

/// Key layout of the shared cache.
pub mod keys {
    pub fn factory_slug(slug: &str) -> String {
        format!("slug:{}", slug)
    }

    pub fn device(factory_id: i64, device_key: &str) -> String {
        format!("dev:{}:{}", factory_id, device_key)
    }

    pub fn params(device_id: i64) -> String {
        format!("params:{}", device_id)
    }

    pub fn last_seen(device_id: i64) -> String {
        format!("last_seen:{}", device_id)
    }

    pub fn rules(factory_id: i64, device_id: i64) -> String {
        format!("rules:{}:{}", factory_id, device_id)
    }
}

/// Publish an invalidation event. The API layer calls this on every
/// CRUD write so subscribed workers converge within seconds; lost
/// publishes are healed by the cache TTLs.
pub async fn publish_invalidation(
    cache: &dyn SharedCache,
    event: &Invalidation,
) -> Result<(), CacheError> {
    cache.publish(INVALIDATION_CHANNEL, &event.encode()).await
}

/// A cache invalidation event, published on CRUD writes and applied by
/// every subscribed process within seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    /// Factory created/updated/deleted; drops the slug mapping.
    Factory { slug: String },
    /// Device CRUD or auto-creation; drops the key-to-id mapping.
    Device { factory_id: i64, device_key: String },
    /// Parameter CRUD; drops the cached key set.
    Params { device_id: i64 },
    /// Rule CRUD; drops the candidate-rule sets of a factory.
    Rules { factory_id: i64 },
}

impl Invalidation {
    pub fn encode(&self) -> String {
        match self {
            Invalidation::Factory { slug } => format!("factory:{}", slug),
            Invalidation::Device {
                factory_id,
                device_key,
            } => format!("device:{}:{}", factory_id, device_key),
            Invalidation::Params { device_id } => format!("params:{}", device_id),
            Invalidation::Rules { factory_id } => format!("rules:{}", factory_id),
        }
    }

    pub fn parse(message: &str) -> Option<Self> {
        let (kind, rest) = message.split_once(':')?;
        match kind {
            "factory" => Some(Invalidation::Factory {
                slug: rest.to_string(),
            }),
            "device" => {
                let (factory_id, device_key) = rest.split_once(':')?;
                Some(Invalidation::Device {
                    factory_id: factory_id.parse().ok()?,
                    device_key: device_key.to_string(),
                })
            }
            "params" => Some(Invalidation::Params {
                device_id: rest.parse().ok()?,
            }),
            "rules" => Some(Invalidation::Rules {
                factory_id: rest.parse().ok()?,
            }),
            _ => None,
        }
    }
}
