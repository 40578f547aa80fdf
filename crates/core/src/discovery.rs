//! Parameter discovery (C2).
//!
//! Reconciles the metric keys of each message with persisted
//! DeviceParameter rows, creating missing ones idempotently. The cached
//! key set short-circuits the common case where nothing is new.

use std::sync::Arc;

use tracing::info;

use crate::cache::IdentityCache;
use crate::error::IngestError;
use crate::store::MetadataStore;
use domain::models::{display_name_from_key, Metrics};

pub struct ParameterDiscovery {
    identity: Arc<IdentityCache>,
    store: Arc<dyn MetadataStore>,
}

impl ParameterDiscovery {
    pub fn new(identity: Arc<IdentityCache>, store: Arc<dyn MetadataStore>) -> Self {
        Self { identity, store }
    }

    /// Ensure every metric key has a DeviceParameter row. Returns the
    /// number of keys newly persisted by this call.
    ///
    /// Idempotent under concurrent writers: the conditional insert makes
    /// racing discoveries of the same key converge on one row, and a
    /// false "new" verdict from a stale cache only costs a no-op write.
    pub async fn discover(
        &self,
        factory_id: i64,
        device_id: i64,
        metrics: &Metrics,
    ) -> Result<u32, IngestError> {
        let known = self.identity.parameter_keys(factory_id, device_id).await?;
        let new_keys: Vec<&String> = metrics
            .keys()
            .filter(|key| !known.contains(key.as_str()))
            .collect();
        if new_keys.is_empty() {
            return Ok(0);
        }

        let mut created = 0u32;
        let mut discovered: Vec<String> = Vec::with_capacity(new_keys.len());
        for key in new_keys {
            let value = &metrics[key.as_str()];
            let display_name = display_name_from_key(key);
            let inserted = self
                .store
                .insert_parameter_if_absent(
                    factory_id,
                    device_id,
                    key,
                    &display_name,
                    value.data_type(),
                )
                .await?;
            if inserted {
                created += 1;
                info!(
                    factory_id = factory_id,
                    device_id = device_id,
                    parameter = %key,
                    data_type = %value.data_type(),
                    "parameter discovered"
                );
            }
            discovered.push(key.clone());
        }

        self.identity
            .extend_parameter_keys(device_id, &discovered)
            .await;
        Ok(created)
    }
}
