//! Layered identity cache (factory, device, parameter-key lookups).
//!
//! Lookup order: in-process map, shared cache, relational store, with
//! write-through on the way back. Concurrent misses for one key coalesce
//! into a single backend call; unknown slugs are negative-cached briefly
//! to bound the damage of a slug flood.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{keys, CacheError, Invalidation, SharedCache, INVALIDATION_CHANNEL};
use crate::config::CacheConfig;
use crate::error::IngestError;
use crate::store::MetadataStore;
use domain::models::Factory;

#[derive(Debug, Clone)]
pub struct IdentityCacheConfig {
    pub identity_ttl: Duration,
    pub params_ttl: Duration,
    pub negative_ttl: Duration,
    /// Register unknown devices on first sighting. When disabled an
    /// unknown device is an `UnknownDevice` drop.
    pub auto_create_devices: bool,
}

impl From<&CacheConfig> for IdentityCacheConfig {
    fn from(config: &CacheConfig) -> Self {
        Self {
            identity_ttl: Duration::from_secs(config.identity_ttl_secs),
            params_ttl: Duration::from_secs(config.params_ttl_secs),
            negative_ttl: Duration::from_secs(config.negative_ttl_secs),
            auto_create_devices: true,
        }
    }
}

struct Entry<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Entry<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn live(&self) -> bool {
        self.expires_at > Instant::now()
    }
}

/// C1: maps `slug -> factory`, `(factory_id, device_key) -> device_id`
/// and `device_id -> parameter key set` with bounded-lifetime caching.
pub struct IdentityCache {
    store: Arc<dyn MetadataStore>,
    shared: Arc<dyn SharedCache>,
    config: IdentityCacheConfig,
    factories: Mutex<HashMap<String, Entry<Option<Factory>>>>,
    devices: Mutex<HashMap<(i64, String), Entry<i64>>>,
    params: Mutex<HashMap<i64, Entry<HashSet<String>>>>,
    flights: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IdentityCache {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        shared: Arc<dyn SharedCache>,
        config: IdentityCacheConfig,
    ) -> Self {
        Self {
            store,
            shared,
            config,
            factories: Mutex::new(HashMap::new()),
            devices: Mutex::new(HashMap::new()),
            params: Mutex::new(HashMap::new()),
            flights: Mutex::new(HashMap::new()),
        }
    }

    async fn flight(&self, key: &str) -> Arc<Mutex<()>> {
        let mut flights = self.flights.lock().await;
        flights
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn clear_flight(&self, key: &str) {
        self.flights.lock().await.remove(key);
    }

    fn log_cache_miss(error: CacheError, key: &str) {
        debug!(key = %key, error = %error, "shared cache unavailable, treating as miss");
    }

    async fn local_factory(&self, slug: &str) -> Option<Option<Factory>> {
        let mut factories = self.factories.lock().await;
        match factories.get(slug) {
            Some(entry) if entry.live() => Some(entry.value.clone()),
            Some(_) => {
                factories.remove(slug);
                None
            }
            None => None,
        }
    }

    /// Resolve a factory by slug.
    ///
    /// `UnknownFactory` both surfaces to the coordinator (which drops the
    /// message) and is held in the negative cache for a short interval.
    pub async fn resolve_factory(&self, slug: &str) -> Result<Factory, IngestError> {
        if let Some(cached) = self.local_factory(slug).await {
            return cached.ok_or_else(|| IngestError::UnknownFactory(slug.to_string()));
        }

        let flight_key = format!("factory:{}", slug);
        let flight = self.flight(&flight_key).await;
        let _guard = flight.lock().await;

        // Another waiter may have populated the cache while we queued.
        if let Some(cached) = self.local_factory(slug).await {
            return cached.ok_or_else(|| IngestError::UnknownFactory(slug.to_string()));
        }

        let shared_key = keys::factory_slug(slug);
        match self.shared.get(&shared_key).await {
            Ok(Some(json)) => match serde_json::from_str::<Factory>(&json) {
                Ok(factory) => {
                    self.factories.lock().await.insert(
                        slug.to_string(),
                        Entry::new(Some(factory.clone()), self.config.identity_ttl),
                    );
                    self.clear_flight(&flight_key).await;
                    return Ok(factory);
                }
                Err(e) => {
                    warn!(slug = %slug, error = %e, "dropping undecodable cache entry");
                    let _ = self.shared.del(&shared_key).await;
                }
            },
            Ok(None) => {}
            Err(e) => Self::log_cache_miss(e, &shared_key),
        }

        let result = match self.store.factory_by_slug(slug).await? {
            Some(factory) => {
                if let Ok(json) = serde_json::to_string(&factory) {
                    if let Err(e) = self
                        .shared
                        .set_ex(&shared_key, &json, self.config.identity_ttl)
                        .await
                    {
                        Self::log_cache_miss(e, &shared_key);
                    }
                }
                self.factories.lock().await.insert(
                    slug.to_string(),
                    Entry::new(Some(factory.clone()), self.config.identity_ttl),
                );
                Ok(factory)
            }
            None => {
                self.factories.lock().await.insert(
                    slug.to_string(),
                    Entry::new(None, self.config.negative_ttl),
                );
                Err(IngestError::UnknownFactory(slug.to_string()))
            }
        };

        self.clear_flight(&flight_key).await;
        result
    }

    async fn local_device(&self, factory_id: i64, device_key: &str) -> Option<i64> {
        let mut devices = self.devices.lock().await;
        let key = (factory_id, device_key.to_string());
        match devices.get(&key) {
            Some(entry) if entry.live() => Some(entry.value),
            Some(_) => {
                devices.remove(&key);
                None
            }
            None => None,
        }
    }

    async fn cache_device(&self, factory_id: i64, device_key: &str, device_id: i64) {
        self.devices.lock().await.insert(
            (factory_id, device_key.to_string()),
            Entry::new(device_id, self.config.identity_ttl),
        );
        let shared_key = keys::device(factory_id, device_key);
        if let Err(e) = self
            .shared
            .set_ex(&shared_key, &device_id.to_string(), self.config.identity_ttl)
            .await
        {
            Self::log_cache_miss(e, &shared_key);
        }
    }

    /// Resolve a device id, auto-registering the device on first sighting.
    ///
    /// The insert uses a conditional write; when another worker wins the
    /// race the existing row is re-read, so exactly one device exists per
    /// `(factory_id, device_key)`.
    pub async fn resolve_device_or_create(
        &self,
        factory_id: i64,
        device_key: &str,
    ) -> Result<i64, IngestError> {
        if let Some(device_id) = self.local_device(factory_id, device_key).await {
            return Ok(device_id);
        }

        let flight_key = format!("device:{}:{}", factory_id, device_key);
        let flight = self.flight(&flight_key).await;
        let _guard = flight.lock().await;

        if let Some(device_id) = self.local_device(factory_id, device_key).await {
            return Ok(device_id);
        }

        let shared_key = keys::device(factory_id, device_key);
        match self.shared.get(&shared_key).await {
            Ok(Some(value)) => {
                if let Ok(device_id) = value.parse::<i64>() {
                    self.devices.lock().await.insert(
                        (factory_id, device_key.to_string()),
                        Entry::new(device_id, self.config.identity_ttl),
                    );
                    self.clear_flight(&flight_key).await;
                    return Ok(device_id);
                }
                let _ = self.shared.del(&shared_key).await;
            }
            Ok(None) => {}
            Err(e) => Self::log_cache_miss(e, &shared_key),
        }

        let device = match self.store.device_by_key(factory_id, device_key).await? {
            Some(device) => device,
            None if !self.config.auto_create_devices => {
                return Err(IngestError::UnknownDevice(
                    factory_id,
                    device_key.to_string(),
                ));
            }
            None => match self
                .store
                .create_device_if_absent(factory_id, device_key)
                .await?
            {
                Some(device) => {
                    info!(
                        factory_id = factory_id,
                        device_id = device.id,
                        device_key = %device_key,
                        "device auto-registered"
                    );
                    let event = Invalidation::Device {
                        factory_id,
                        device_key: device_key.to_string(),
                    };
                    if let Err(e) = self
                        .shared
                        .publish(INVALIDATION_CHANNEL, &event.encode())
                        .await
                    {
                        Self::log_cache_miss(e, INVALIDATION_CHANNEL);
                    }
                    device
                }
                // Another worker created it between our read and insert.
                None => self
                    .store
                    .device_by_key(factory_id, device_key)
                    .await?
                    .ok_or_else(|| {
                        IngestError::TransientStore(format!(
                            "device {} vanished after insert race",
                            device_key
                        ))
                    })?,
            },
        };

        self.cache_device(factory_id, device_key, device.id).await;
        self.clear_flight(&flight_key).await;
        Ok(device.id)
    }

    /// Parameter keys known for a device, used to short-circuit discovery.
    pub async fn parameter_keys(
        &self,
        factory_id: i64,
        device_id: i64,
    ) -> Result<HashSet<String>, IngestError> {
        {
            let mut params = self.params.lock().await;
            match params.get(&device_id) {
                Some(entry) if entry.live() => return Ok(entry.value.clone()),
                Some(_) => {
                    params.remove(&device_id);
                }
                None => {}
            }
        }

        let flight_key = format!("params:{}", device_id);
        let flight = self.flight(&flight_key).await;
        let _guard = flight.lock().await;

        {
            let params = self.params.lock().await;
            if let Some(entry) = params.get(&device_id) {
                if entry.live() {
                    return Ok(entry.value.clone());
                }
            }
        }

        let shared_key = keys::params(device_id);
        match self.shared.get(&shared_key).await {
            Ok(Some(json)) => {
                if let Ok(keys) = serde_json::from_str::<Vec<String>>(&json) {
                    let set: HashSet<String> = keys.into_iter().collect();
                    self.params
                        .lock()
                        .await
                        .insert(device_id, Entry::new(set.clone(), self.config.params_ttl));
                    self.clear_flight(&flight_key).await;
                    return Ok(set);
                }
                let _ = self.shared.del(&shared_key).await;
            }
            Ok(None) => {}
            Err(e) => Self::log_cache_miss(e, &shared_key),
        }

        let keys_vec = self.store.parameter_keys(factory_id, device_id).await?;
        let set: HashSet<String> = keys_vec.iter().cloned().collect();
        if let Ok(json) = serde_json::to_string(&keys_vec) {
            if let Err(e) = self
                .shared
                .set_ex(&shared_key, &json, self.config.params_ttl)
                .await
            {
                Self::log_cache_miss(e, &shared_key);
            }
        }
        self.params
            .lock()
            .await
            .insert(device_id, Entry::new(set.clone(), self.config.params_ttl));
        self.clear_flight(&flight_key).await;
        Ok(set)
    }

    /// Add freshly discovered keys to the cached set and mirror the full
    /// set to the shared cache.
    pub async fn extend_parameter_keys(&self, device_id: i64, new_keys: &[String]) {
        let snapshot = {
            let mut params = self.params.lock().await;
            let entry = params
                .entry(device_id)
                .or_insert_with(|| Entry::new(HashSet::new(), self.config.params_ttl));
            for key in new_keys {
                entry.value.insert(key.clone());
            }
            entry.value.iter().cloned().collect::<Vec<_>>()
        };

        let shared_key = keys::params(device_id);
        if let Ok(json) = serde_json::to_string(&snapshot) {
            if let Err(e) = self
                .shared
                .set_ex(&shared_key, &json, self.config.params_ttl)
                .await
            {
                Self::log_cache_miss(e, &shared_key);
            }
        }
    }

    /// Apply an invalidation event from the pub/sub channel.
    pub async fn apply_invalidation(&self, event: &Invalidation) {
        match event {
            Invalidation::Factory { slug } => {
                self.factories.lock().await.remove(slug);
                let _ = self.shared.del(&keys::factory_slug(slug)).await;
            }
            Invalidation::Device {
                factory_id,
                device_key,
            } => {
                self.devices
                    .lock()
                    .await
                    .remove(&(*factory_id, device_key.clone()));
                let _ = self.shared.del(&keys::device(*factory_id, device_key)).await;
            }
            Invalidation::Params { device_id } => {
                self.params.lock().await.remove(device_id);
                let _ = self.shared.del(&keys::params(*device_id)).await;
            }
            // Rule caching lives with the alerting worker.
            Invalidation::Rules { .. } => {}
        }
    }
}
